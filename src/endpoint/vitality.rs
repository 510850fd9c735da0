//! Vitality monitoring
//!
//! Periodically sends a `KeepAlive` while no call is in flight. Outcomes are
//! only logged; recovery stays the business of the call path.

use std::sync::atomic::Ordering;
use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{EndpointState, Shared};
use crate::network::TransportError;
use crate::protocol::{send_message, Message, MessageError};

pub(super) fn spawn(shared: Weak<Shared>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        let mut alive = true;
        loop {
            ticker.tick().await;

            let Some(shared) = shared.upgrade() else {
                break;
            };
            match *shared.state.read().await {
                EndpointState::Stopped => break,
                EndpointState::Idle => continue,
                EndpointState::Running => {}
            }
            if shared.call_in_flight.load(Ordering::SeqCst) {
                continue;
            }

            let result = {
                let mut writer = shared.writer.lock().await;
                match writer.as_mut() {
                    Some(writer) => send_message(writer, &Message::KeepAlive).await.map(|_| ()),
                    None => Err(MessageError::Transport(TransportError::Disconnected)),
                }
            };

            let ok = result.is_ok();
            if ok != alive {
                shared.log.log_vitality(ok);
                alive = ok;
            }
            if let Err(e) = result {
                shared.log.log_event(&format!("Keep-alive not sent: {}", e));
            }
        }

        tracing::debug!("Vitality monitor exiting");
    })
}
