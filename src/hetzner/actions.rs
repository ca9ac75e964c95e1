//! Action polling.

use tokio::time::sleep;
use tracing::debug;

use crate::backend::{ActionHandle, ActionWaiter, BackendFuture, Deadline};

use super::types::{ActionEnvelope, ActionStatus};
use super::{HetznerBackend, HetznerError};

impl ActionWaiter for HetznerBackend {
    fn wait_for_action<'a>(
        &'a self,
        action: &'a ActionHandle,
        deadline: Deadline,
    ) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let path = format!("actions/{}", action.id);
            loop {
                let envelope: ActionEnvelope = self.get(&path, &[]).await?;
                match envelope.action.status {
                    ActionStatus::Success => return Ok(()),
                    ActionStatus::Error => {
                        let detail = envelope.action.error.unwrap_or_default();
                        return Err(HetznerError::ActionFailed {
                            action_id: action.id,
                            command: action.command.clone(),
                            code: detail.code,
                            message: detail.message,
                        });
                    }
                    ActionStatus::Running => {}
                }

                if deadline.expired() {
                    return Err(HetznerError::Timeout {
                        action_id: action.id,
                        command: action.command.clone(),
                    });
                }
                debug!(action_id = action.id, command = %action.command, "action still running");
                sleep(self.poll_interval).await;
            }
        })
    }
}
