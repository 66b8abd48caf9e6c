use super::completion::Completion;
use crate::core::{Result, diagnostics};
use std::sync::Mutex;
use tracing::debug;

/// A single process-wide async critical section without timeout or epoch.
///
/// Used around role changes, where every holder must eventually finish.
pub struct SingularSyncPoint {
    name: String,
    occupant: Mutex<Option<Completion<()>>>,
}

impl SingularSyncPoint {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            occupant: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn enter(&self) -> Result<()> {
        loop {
            let occupant = {
                let mut slot = self.occupant.lock()?;
                match slot.as_ref() {
                    None => {
                        *slot = Some(Completion::new());
                        return Ok(());
                    }
                    Some(occupant) => occupant.clone(),
                }
            };

            debug!(sync_point = %self.name, "waiting for occupant to leave");
            occupant.wait().await?;
        }
    }

    pub fn leave(&self) -> Result<()> {
        let previous = self.occupant.lock()?.take();
        match previous {
            Some(signal) => {
                signal.try_set_value(());
                Ok(())
            }
            None => Err(diagnostics::violation(
                "SingularSyncPoint.Leave",
                format!("{} left while unoccupied", self.name),
            )),
        }
    }

    pub fn is_occupied(&self) -> Result<bool> {
        Ok(self.occupant.lock()?.is_some())
    }
}
