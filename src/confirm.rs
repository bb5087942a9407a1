// src/confirm.rs - Interactive confirmation gate
use dialoguer::{theme::ColorfulTheme, Confirm};

use crate::error::{FleetError, FleetResult};

/// Confirm-or-abort primitive guarding side-effecting stages. Behind a
/// trait so the orchestrator can be driven in tests without a terminal.
#[cfg_attr(test, mockall::automock)]
pub trait ConfirmGate: Send + Sync {
    /// Ask the operator; `false` means decline, never an error.
    fn confirm(&self, prompt: &str) -> FleetResult<bool>;
}

/// Terminal-backed gate. Defaults to "no" so an accidental Enter never
/// approves a request.
pub struct TerminalGate {
    theme: ColorfulTheme,
}

impl TerminalGate {
    pub fn new() -> Self {
        Self {
            theme: ColorfulTheme::default(),
        }
    }
}

impl Default for TerminalGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfirmGate for TerminalGate {
    fn confirm(&self, prompt: &str) -> FleetResult<bool> {
        Confirm::with_theme(&self.theme)
            .with_prompt(prompt)
            .default(false)
            .interact()
            .map_err(|e| FleetError::UnexpectedError(format!("Confirmation error: {}", e)))
    }
}
