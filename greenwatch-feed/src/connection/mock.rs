use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use greenwatch_core::protocol::{self, Frame};
use greenwatch_core::{ControlDevice, DeviceCode, EnvCode, ParameterKind, Thresholds};
use rand::Rng;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{Link, LinkEvent, Transport};

/// Device status frames go out every this many sensor frames.
const STATUS_EVERY: u64 = 6;

const ACTUATOR_KINDS: [(&str, &str); 4] = [
    ("PUMP", "Irrigation pump"),
    ("FAN", "Ventilation fan"),
    ("VALVE", "Water valve"),
    ("LIGHT", "Grow light"),
];

/// Mock transport that synthesizes a plausible push feed for one
/// environment.
pub struct MockTransport {
    env: EnvCode,
    frame_interval: Duration,
    devices: Arc<MockDevices>,
}

struct MockDevices {
    actuators: Vec<ControlDevice>,
    sensors: Vec<DeviceCode>,
}

impl MockTransport {
    /// `frame_interval_secs` is raised to 1 when given as 0.
    pub fn new(env: EnvCode, frame_interval_secs: u64, device_count: usize) -> Self {
        let actuators = (0..device_count)
            .map(|i| {
                let (prefix, name) = ACTUATOR_KINDS[i % ACTUATOR_KINDS.len()];
                ControlDevice {
                    device_code: DeviceCode::from(format!("{prefix}{:02}", i + 1).as_str()),
                    device_name: Some(name.into()),
                    status: Some(0),
                }
            })
            .collect();
        let sensors = (0..device_count)
            .map(|i| DeviceCode::from(format!("SENSOR{:02}", i + 1).as_str()))
            .collect();

        Self {
            env,
            frame_interval: Duration::from_secs(frame_interval_secs.max(1)),
            devices: Arc::new(MockDevices { actuators, sensors }),
        }
    }

    /// The actuators this transport reports on, for seeding the store.
    pub fn device_list(&self) -> Vec<ControlDevice> {
        self.devices.actuators.clone()
    }
}

/// Readings scattered around the standard bands, sometimes just outside.
fn sensor_payload() -> Value {
    let mut rng = rand::rng();
    let thresholds = Thresholds::standard();

    let list: Vec<Value> = ParameterKind::ALL
        .into_iter()
        .map(|kind| {
            let band = thresholds.get(kind);
            let margin = (band.max - band.min) * 0.1;
            let value: f64 = rng.random_range((band.min - margin)..(band.max + margin));
            json!({
                "envParameterType": kind.code(),
                "dataValue": (value * 10.0).round() / 10.0,
                "ex": 0,
            })
        })
        .collect();

    let mut payload = Map::new();
    payload.insert(protocol::SENSOR_LIST_KEY.to_owned(), Value::Array(list));
    Value::Object(payload)
}

fn control_status_payload(devices: &MockDevices) -> Value {
    let mut rng = rand::rng();
    devices
        .actuators
        .iter()
        .map(|device| {
            json!({
                "deviceCode": device.device_code,
                "status": i64::from(rng.random_bool(0.5)),
            })
        })
        .collect()
}

fn sensor_status_payload(devices: &MockDevices) -> Value {
    let mut rng = rand::rng();
    devices
        .sensors
        .iter()
        .map(|device| {
            json!({
                "deviceCode": device,
                "status": i64::from(rng.random_ratio(95, 100)),
            })
        })
        .collect()
}

fn frames_for_tick(env: &EnvCode, devices: &MockDevices, tick: u64) -> Vec<Frame> {
    let mut frames = vec![Frame::new(
        protocol::SENSOR_DATA,
        env.as_str(),
        sensor_payload(),
    )];

    if tick % STATUS_EVERY == 0 {
        frames.push(Frame::new(
            protocol::CONTROL_DEVICE_STATUS,
            env.as_str(),
            control_status_payload(devices),
        ));
        frames.push(Frame::new(
            protocol::SENSOR_DEVICE_STATUS,
            env.as_str(),
            sensor_status_payload(devices),
        ));
    }

    frames
}

async fn emit(events: &mpsc::Sender<LinkEvent>, frame: &Frame) -> bool {
    match protocol::encode(frame) {
        Ok(text) => events.send(LinkEvent::Text(text)).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to encode mock frame");
            true
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = std::convert::Infallible;

    async fn open(&self) -> Result<Link, Self::Error> {
        let (events_tx, events_rx) = mpsc::channel(100);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(100);

        let env = self.env.clone();
        let devices = Arc::clone(&self.devices);
        let frame_interval = self.frame_interval;

        info!(
            env = %env,
            device_count = devices.actuators.len(),
            frame_interval_secs = frame_interval.as_secs(),
            "Starting mock feed"
        );

        tokio::spawn(async move {
            let greeting = Frame::new(
                protocol::SYSTEM_LOG,
                env.as_str(),
                json!({ "type": "success", "message": "Mock feed connected", "source": "mock" }),
            );
            if !emit(&events_tx, &greeting).await {
                return;
            }

            let mut interval = tokio::time::interval(frame_interval);
            let mut tick: u64 = 0;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        tick += 1;
                        for frame in frames_for_tick(&env, &devices, tick) {
                            if !emit(&events_tx, &frame).await {
                                info!("Link dropped, mock feed shutting down");
                                return;
                            }
                        }
                    }
                    message = outbound_rx.recv() => match message {
                        Some(text) => debug!(%text, "Mock feed discarding outbound message"),
                        None => return,
                    },
                }
            }
        });

        Ok(Link {
            events: events_rx,
            outbound: outbound_tx,
        })
    }

    fn endpoint(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use greenwatch_core::protocol::MessageType;

    use super::*;

    #[test]
    fn device_list_cycles_actuator_kinds() {
        let transport = MockTransport::new(EnvCode::from("E1"), 1, 5);
        let codes: Vec<_> = transport
            .device_list()
            .into_iter()
            .map(|d| d.device_code.as_str().to_owned())
            .collect();

        assert_eq!(codes, ["PUMP01", "FAN02", "VALVE03", "LIGHT04", "PUMP05"]);
    }

    #[test]
    fn sensor_payload_parses() {
        let parsed = protocol::sensor_data(&sensor_payload()).unwrap();

        assert_eq!(parsed.entries.len(), ParameterKind::ALL.len());
        assert!(parsed.skipped.is_empty());
    }

    #[test]
    fn status_frames_follow_schedule() {
        let transport = MockTransport::new(EnvCode::from("E1"), 1, 2);
        let env = EnvCode::from("E1");

        assert_eq!(frames_for_tick(&env, &transport.devices, 1).len(), 1);

        let frames = frames_for_tick(&env, &transport.devices, STATUS_EVERY);
        let kinds: Vec<_> = frames.iter().map(Frame::message_type).collect();
        assert_eq!(
            kinds,
            [
                MessageType::SensorData,
                MessageType::ControlDeviceStatus,
                MessageType::SensorDeviceStatus
            ]
        );
        let statuses = protocol::device_statuses(&frames[1].data).unwrap();
        assert_eq!(statuses.entries.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn open_streams_greeting_then_readings() {
        let transport = MockTransport::new(EnvCode::from("E1"), 5, 1);
        let mut link = transport.open().await.unwrap();

        let Some(LinkEvent::Text(first)) = link.events.recv().await else {
            panic!("expected greeting frame");
        };
        assert_eq!(
            Frame::decode(&first).unwrap().message_type(),
            MessageType::SystemLog
        );

        let Some(LinkEvent::Text(second)) = link.events.recv().await else {
            panic!("expected sensor frame");
        };
        let frame = Frame::decode(&second).unwrap();
        assert_eq!(frame.message_type(), MessageType::SensorData);
        assert_eq!(frame.env.as_deref(), Some("E1"));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_still_streams() {
        let transport = MockTransport::new(EnvCode::from("E1"), 0, 1);
        let mut link = transport.open().await.unwrap();

        for _ in 0..3 {
            assert!(matches!(
                link.events.recv().await,
                Some(LinkEvent::Text(_))
            ));
        }
    }
}
