use greenwatch_core::protocol::{self, Frame, MessageType, ProtocolError};
use tracing::{debug, trace, warn};

use crate::state::Store;

/// Why a frame was dropped without touching the store.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Diagnostic {
    #[error("unknown message type `{0}`")]
    UnknownType(Box<str>),
    #[error("malformed {message} payload: {error}")]
    MalformedPayload {
        message: MessageType,
        error: ProtocolError,
    },
}

/// What `MessageRouter::handle_message` did with a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// The payload was applied to the store.
    Applied {
        message: MessageType,
        accepted: usize,
        skipped: usize,
    },
    /// The frame belongs to an environment other than the selected one.
    Filtered { env: Option<Box<str>> },
    Ignored(Diagnostic),
}

/// Routes decoded frames to the store mutators by message type.
#[derive(Clone)]
pub struct MessageRouter {
    store: Store,
}

impl MessageRouter {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Frames are accepted when no environment is selected or when the frame
    /// names the selected one.
    fn accepts(&self, env: Option<&str>) -> bool {
        self.store.read(|state| match &state.current_env {
            None => true,
            Some(current) => env == Some(current.code.as_str()),
        })
    }

    pub fn handle_message(&self, frame: Frame) -> Dispatch {
        if !self.accepts(frame.env.as_deref()) {
            trace!(env = ?frame.env, "Frame for another environment, ignoring");
            return Dispatch::Filtered { env: frame.env };
        }

        let message = frame.message_type();
        let applied = match &message {
            MessageType::SensorData => protocol::sensor_data(&frame.data).map(|parsed| {
                let counts = (parsed.entries.len(), parsed.skipped);
                self.store.merge_sensor_data(parsed.entries);
                counts
            }),
            MessageType::ControlDeviceStatus => {
                protocol::device_statuses(&frame.data).map(|parsed| {
                    let accepted = parsed.entries.len();
                    self.store.update_device_work_statuses(parsed.entries);
                    (accepted, parsed.skipped)
                })
            }
            MessageType::SensorDeviceStatus => {
                protocol::device_statuses(&frame.data).map(|parsed| {
                    let accepted = parsed.entries.len();
                    self.store.update_sensor_online_status(parsed.entries);
                    (accepted, parsed.skipped)
                })
            }
            MessageType::SystemLog => protocol::system_log(&frame.data).map(|record| {
                self.store
                    .add_log(record.kind, &record.message, record.source.as_deref());
                (1, Vec::new())
            }),
            MessageType::Unknown(other) => {
                warn!(message_type = %other, "Unknown message type");
                return Dispatch::Ignored(Diagnostic::UnknownType(other.clone()));
            }
        };

        match applied {
            Ok((accepted, skipped)) => {
                for reason in &skipped {
                    debug!(%message, %reason, "Skipped malformed entry");
                }
                Dispatch::Applied {
                    message,
                    accepted,
                    skipped: skipped.len(),
                }
            }
            Err(error) => {
                warn!(%message, %error, "Malformed payload");
                Dispatch::Ignored(Diagnostic::MalformedPayload { message, error })
            }
        }
    }
}
