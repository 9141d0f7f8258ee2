//! Utility functions for CLI operations.

use std::io::{self, IsTerminal, Write};

use anyhow::{Result, bail};
use dialoguer::Confirm;
use dialoguer::theme::ColorfulTheme;

/// Write command output to stdout.
pub fn write_output(content: &str) -> Result<()> {
    let mut stdout = io::stdout().lock();
    stdout.write_all(content.as_bytes())?;
    stdout.flush()?;
    Ok(())
}

/// Ask for confirmation before an irreversible action.
///
/// `assume_yes` skips the prompt. Without a terminal there is nobody to ask,
/// so the caller must pass `--yes`.
pub fn confirm(prompt: &str, assume_yes: bool) -> Result<bool> {
    if assume_yes {
        return Ok(true);
    }
    if !io::stdin().is_terminal() || !io::stderr().is_terminal() {
        bail!("Cannot prompt for confirmation in non-interactive mode. Use --yes to skip it.");
    }

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(false)
        .interact()?;
    Ok(confirmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirm_assume_yes() {
        assert!(confirm("Send?", true).unwrap());
    }
}
