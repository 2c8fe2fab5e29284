use std::sync::Arc;
use std::time::Instant;
use futures::StreamExt;
use log::{info, warn};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::device::dispatch::EventDispatcher;
use crate::device::types::{ButtonAction, ButtonEvent, DeviceIdentity, Subscription};
use crate::error::PedalError;
use crate::platform::{NotificationStream, PlatformSession};

/// Decode a button notification payload. Valid payloads are exactly one byte;
/// the high bit is reserved and masked off.
pub(crate) fn decode_button_payload(value: &[u8]) -> Result<u8, PedalError> {
    match value {
        [byte] => Ok(byte & 0x7F),
        _ => Err(PedalError::MalformedPayload { len: value.len() }),
    }
}

fn read_notifications_task(
    cancel: CancellationToken,
    mut notification_stream: NotificationStream,
    identity: DeviceIdentity,
    dispatcher: Arc<EventDispatcher>,
) -> JoinHandle<()> {
    return spawn(async move {
        'mainloop: loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                Some(notification) = notification_stream.next() => {
                    let Some(action) = identity.action_for(notification.characteristic)
                    else {
                        continue;
                    };

                    match decode_button_payload(&notification.value) {
                        Err(err) => {
                            warn!("Failed to decode button notification: {:?}", err);
                            dispatcher.dispatch_error(&err);
                        },
                        Ok(button_index) => {
                            let event = ButtonEvent {
                                action,
                                button_index,
                                timestamp: Instant::now(),
                            };
                            dispatcher.dispatch_button(event);
                        },
                    }
                }
            }
        }
    });
}

/// Owns the button characteristic subscriptions of one session and the task
/// that drains its notification stream.
pub(crate) struct CharacteristicSubscriber {
    session: Arc<dyn PlatformSession>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    subscriptions: Vec<Subscription>,
}

impl CharacteristicSubscriber {
    /// Subscribe to both button characteristics and start draining
    /// notifications. On failure the session is left as-is; the caller is
    /// expected to close it.
    pub(crate) async fn attach(
        session: Arc<dyn PlatformSession>,
        identity: DeviceIdentity,
        dispatcher: Arc<EventDispatcher>,
        parent_cancel: &CancellationToken,
    ) -> Result<CharacteristicSubscriber, PedalError> {
        // Take the stream before subscribing so no notification can slip past
        let notification_stream = session.notifications().await?;

        let mut subscriptions = Vec::new();
        for (uuid, action) in [(identity.button_down, ButtonAction::Down), (identity.button_up, ButtonAction::Up)] {
            let characteristic = session.characteristic(uuid).await?;

            info!("Subscribing to characteristic {:?}", characteristic.uuid);
            session.subscribe(&characteristic).await?;
            subscriptions.push(Subscription { characteristic, action });
        }

        let cancel = parent_cancel.child_token();
        let handle = read_notifications_task(
            cancel.clone(),
            notification_stream,
            identity,
            dispatcher,
        );

        Ok(CharacteristicSubscriber { session, cancel, handle, subscriptions })
    }

    /// Stop the reader task and drop the subscriptions. Joins the task before
    /// unsubscribing, so no handler runs after this returns.
    pub(crate) async fn detach(self) {
        self.cancel.cancel();

        info!("Waiting for read notifications task to stop");
        self.handle.await.expect("Failed to join read notifications task");
        info!("Read notifications task stopped");

        for subscription in &self.subscriptions {
            if let Err(err) = self.session.unsubscribe(&subscription.characteristic).await {
                warn!("Failed to unsubscribe from characteristic {:?}: {:?}", subscription.characteristic.uuid, err);
            }
        }
    }
}
