use std::{error::Error, fmt::Display, future::Future};

use tokio_util::sync::CancellationToken;

/// Shared record of whether the user pressed Ctrl-C.
#[derive(Clone, Debug)]
pub struct InterruptState {
    token: CancellationToken,
}

#[derive(Clone, Debug)]
pub struct InterruptedError {}
impl Display for InterruptedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "interrupted")
    }
}
impl Error for InterruptedError {}

impl InterruptState {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    pub fn set_interrupted(&self) {
        self.token.cancel();
    }

    pub fn is_interrupted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Passed to the engine so that an interrupted apply stops between
    /// remote calls.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Run `fut` unless interrupted first.
    pub async fn run<T>(&self, fut: impl Future<Output = anyhow::Result<T>>) -> anyhow::Result<T> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(InterruptedError {}.into()),
            result = fut => result,
        }
    }
}

fn set_process_interrupt_handler(interrupted: &InterruptState) -> anyhow::Result<()> {
    let interrupted = interrupted.clone();
    ctrlc::set_handler(move || {
        if interrupted.is_interrupted() {
            // Second Ctrl-C: the user does not want to wait for cleanup.
            std::process::exit(130);
        }
        interrupted.set_interrupted();
    })?;
    Ok(())
}

pub fn set_up_process_interrupt_handler() -> anyhow::Result<InterruptState> {
    let interrupt_state = InterruptState::new();
    set_process_interrupt_handler(&interrupt_state)?;
    Ok(interrupt_state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn interrupted_work_is_abandoned() {
        let state = InterruptState::new();
        assert_eq!(state.run(async { Ok(1) }).await.unwrap(), 1);

        state.set_interrupted();
        let err = state
            .run(std::future::pending::<anyhow::Result<()>>())
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<InterruptedError>().is_some());
        assert!(state.token().is_cancelled());
    }
}
