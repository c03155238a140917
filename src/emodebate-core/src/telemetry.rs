//! Fixed-cadence emotion telemetry over OSC.
//!
//! Frames are fire-and-forget: a failed send is logged and counted, never
//! retried, and never blocks the debate.

use std::time::Duration;

use async_trait::async_trait;
use rosc::{OscMessage, OscPacket, OscType};
use tokio::net::UdpSocket;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use crate::config::TelemetryConfig;
use crate::emotion::{EmotionVector, label_index};
use crate::error::DebateError;
use crate::persona::Persona;

/// One addressed numeric sample.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryFrame {
    pub address: String,
    pub value: f32,
}

impl TelemetryFrame {
    pub fn new(address: impl Into<String>, value: f32) -> Self {
        Self {
            address: address.into(),
            value,
        }
    }

    /// Encode as an OSC message with a single float argument.
    pub fn encode(&self) -> Result<Vec<u8>, DebateError> {
        let packet = OscPacket::Message(OscMessage {
            addr: self.address.clone(),
            args: vec![OscType::Float(self.value)],
        });
        rosc::encoder::encode(&packet)
            .map_err(|e| DebateError::TransientIo(format!("OSC encode failed: {}", e)))
    }
}

/// Destination for telemetry frames.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn send(&self, frame: &TelemetryFrame) -> Result<(), DebateError>;
}

/// OSC datagrams over a connected UDP socket.
pub struct OscUdpSink {
    socket: UdpSocket,
}

impl OscUdpSink {
    pub async fn connect(addr: &str) -> Result<Self, DebateError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(addr).await?;
        Ok(Self { socket })
    }
}

#[async_trait]
impl TelemetrySink for OscUdpSink {
    async fn send(&self, frame: &TelemetryFrame) -> Result<(), DebateError> {
        let bytes = frame.encode()?;
        self.socket
            .send(&bytes)
            .await
            .map_err(|e| DebateError::TransientIo(format!("{}: {}", frame.address, e)))?;
        Ok(())
    }
}

/// Granularity of the tokio timer wheel.
const TIMER_RESOLUTION_NANOS: u64 = 1_000_000;

/// Paces frames to a fixed interval.
///
/// Deadlines advance from the previous deadline rather than from the wake-up
/// time, so oversleeping does not accumulate. When a caller falls behind the
/// schedule is re-anchored to now instead of firing a burst.
///
/// The interval is `1/fps` rounded up to whole timer ticks. The timer fires on
/// tick boundaries, so an unrounded interval would let two wake-ups land
/// closer together than `1/fps`.
#[derive(Debug)]
pub struct FramePacer {
    interval: Duration,
    next: Option<Instant>,
}

impl FramePacer {
    pub fn new(fps: u32) -> Self {
        let exact_nanos = 1_000_000_000u64.div_ceil(u64::from(fps.max(1)));
        let ticks = exact_nanos.div_ceil(TIMER_RESOLUTION_NANOS);
        Self {
            interval: Duration::from_nanos(ticks * TIMER_RESOLUTION_NANOS),
            next: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait for the next frame slot.
    pub async fn tick(&mut self) {
        let now = Instant::now();
        let fire_at = match self.next {
            Some(deadline) if deadline > now => {
                sleep_until(deadline).await;
                deadline
            }
            _ => now,
        };
        self.next = Some(fire_at + self.interval);
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryStats {
    pub frames_sent: u64,
    pub frames_dropped: u64,
}

/// Streams an emotion vector as a paced frame sequence.
pub struct TelemetryStreamer {
    sink: Option<Box<dyn TelemetrySink>>,
    pacer: FramePacer,
    stats: TelemetryStats,
}

impl TelemetryStreamer {
    pub fn new(sink: Option<Box<dyn TelemetrySink>>, fps: u32) -> Self {
        Self {
            sink,
            pacer: FramePacer::new(fps),
            stats: TelemetryStats::default(),
        }
    }

    /// Streamer that emits nothing.
    pub fn disabled() -> Self {
        Self::new(None, 1)
    }

    /// Open the UDP sink described by `config`.
    pub async fn connect(config: &TelemetryConfig) -> Result<Self, DebateError> {
        if !config.enabled {
            return Ok(Self::disabled());
        }
        let addr = format!("{}:{}", config.host, config.port);
        let sink = OscUdpSink::connect(&addr).await?;
        info!(%addr, fps = config.fps, "streaming OSC telemetry");
        Ok(Self::new(Some(Box::new(sink)), config.fps))
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    pub fn stats(&self) -> TelemetryStats {
        self.stats
    }

    /// Emit every frame for `emotions` under `persona`'s address space.
    pub async fn stream(&mut self, emotions: &EmotionVector, persona: &Persona) {
        let Some(sink) = &self.sink else {
            return;
        };

        for frame in frames_for(emotions, persona) {
            self.pacer.tick().await;
            match sink.send(&frame).await {
                Ok(()) => {
                    self.stats.frames_sent += 1;
                    debug!(address = %frame.address, value = frame.value, "frame");
                }
                Err(e) => {
                    self.stats.frames_dropped += 1;
                    warn!(address = %frame.address, error = %e, "telemetry frame dropped");
                }
            }
        }
    }
}

/// Frame sequence for one turn: each label, then valence, arousal and primary label.
pub fn frames_for(emotions: &EmotionVector, persona: &Persona) -> Vec<TelemetryFrame> {
    let slug = persona.slug();
    let mut frames: Vec<TelemetryFrame> = emotions
        .scores()
        .iter()
        .map(|s| TelemetryFrame::new(format!("/{}/emotion/{}", slug, s.label), s.intensity))
        .collect();

    let primary = label_index(emotions.primary_label()).unwrap_or_default();
    frames.push(TelemetryFrame::new(format!("/{}/valence", slug), emotions.valence()));
    frames.push(TelemetryFrame::new(format!("/{}/arousal", slug), emotions.arousal()));
    frames.push(TelemetryFrame::new(
        format!("/{}/primary_emotion", slug),
        primary as f32,
    ));
    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emotion::EmotionSource;
    use crate::persona::PersonaSlot;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<(Instant, TelemetryFrame)>>>;

    struct Recorder(Log);

    #[async_trait]
    impl TelemetrySink for Recorder {
        async fn send(&self, frame: &TelemetryFrame) -> Result<(), DebateError> {
            self.0.lock().unwrap().push((Instant::now(), frame.clone()));
            Ok(())
        }
    }

    struct Refused;

    #[async_trait]
    impl TelemetrySink for Refused {
        async fn send(&self, _frame: &TelemetryFrame) -> Result<(), DebateError> {
            Err(DebateError::TransientIo("connection refused".into()))
        }
    }

    fn skeptic() -> Persona {
        Persona::new(PersonaSlot::B, "Skeptic", "prompt").with_voice("bf_emma")
    }

    fn vector() -> EmotionVector {
        EmotionVector::new(
            [("annoyance", 0.8), ("disapproval", 0.6), ("curiosity", 0.4)],
            EmotionSource::Classified,
        )
    }

    #[test]
    fn test_frame_order_and_addresses() {
        let frames = frames_for(&vector(), &skeptic());
        let addresses: Vec<&str> = frames.iter().map(|f| f.address.as_str()).collect();
        assert_eq!(
            addresses,
            vec![
                "/skeptic/emotion/annoyance",
                "/skeptic/emotion/disapproval",
                "/skeptic/emotion/curiosity",
                "/skeptic/valence",
                "/skeptic/arousal",
                "/skeptic/primary_emotion",
            ]
        );
        assert_eq!(frames[0].value, 0.8);
        assert_eq!(
            frames[5].value,
            label_index("annoyance").unwrap() as f32
        );
    }

    #[test]
    fn test_encode_is_osc_float_message() {
        let bytes = TelemetryFrame::new("/skeptic/valence", -0.5).encode().unwrap();
        let (_, packet) = rosc::decoder::decode_udp(&bytes).unwrap();
        match packet {
            OscPacket::Message(msg) => {
                assert_eq!(msg.addr, "/skeptic/valence");
                assert_eq!(msg.args, vec![OscType::Float(-0.5)]);
            }
            other => panic!("unexpected packet: {:?}", other),
        }
    }

    #[test]
    fn test_interval_rounds_up_to_timer_ticks() {
        assert_eq!(FramePacer::new(30).interval(), Duration::from_millis(34));
        assert_eq!(FramePacer::new(25).interval(), Duration::from_millis(40));
        assert_eq!(FramePacer::new(240).interval(), Duration::from_millis(5));
        assert_eq!(FramePacer::new(0).interval(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_respect_cadence() {
        let log: Log = Arc::default();
        let mut streamer = TelemetryStreamer::new(Some(Box::new(Recorder(log.clone()))), 30);
        let budget = Duration::from_secs_f64(1.0 / 30.0);

        streamer.stream(&vector(), &skeptic()).await;
        streamer.stream(&vector(), &skeptic()).await;

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 12);
        for pair in log.windows(2) {
            let gap = pair[1].0 - pair[0].0;
            assert!(gap >= budget, "gap {:?} below budget", gap);
        }
        // Anchored schedule: wake-up lag does not accumulate across turns.
        assert!(log[11].0 - log[0].0 < streamer.pacer.interval() * 12);
        assert_eq!(streamer.stats().frames_sent, 12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_caller_does_not_burst() {
        let log: Log = Arc::default();
        let mut streamer = TelemetryStreamer::new(Some(Box::new(Recorder(log.clone()))), 30);

        streamer.stream(&vector(), &skeptic()).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        streamer.stream(&vector(), &skeptic()).await;

        let log = log.lock().unwrap();
        let budget = Duration::from_secs_f64(1.0 / 30.0);
        assert_eq!(log.len(), 12);
        for pair in log[6..].windows(2) {
            assert!(pair[1].0 - pair[0].0 >= budget);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failures_are_counted_not_raised() {
        let mut streamer = TelemetryStreamer::new(Some(Box::new(Refused)), 30);
        let started = Instant::now();
        streamer.stream(&vector(), &skeptic()).await;

        let stats = streamer.stats();
        assert_eq!(stats.frames_sent, 0);
        assert_eq!(stats.frames_dropped, 6);
        // Pacing continues through failures.
        assert!(Instant::now() - started >= streamer.pacer.interval() * 5);
    }

    #[tokio::test]
    async fn test_disabled_streamer_emits_nothing() {
        let mut streamer = TelemetryStreamer::disabled();
        streamer.stream(&vector(), &skeptic()).await;
        assert!(!streamer.is_enabled());
        assert_eq!(streamer.stats(), TelemetryStats::default());
    }

    #[tokio::test]
    async fn test_udp_sink_delivers_datagrams() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = receiver.local_addr().unwrap().to_string();
        let sink = OscUdpSink::connect(&addr).await.unwrap();

        sink.send(&TelemetryFrame::new("/truth_seeker/arousal", 0.7))
            .await
            .unwrap();

        let mut buf = [0u8; 256];
        let n = receiver.recv(&mut buf).await.unwrap();
        let (_, packet) = rosc::decoder::decode_udp(&buf[..n]).unwrap();
        assert!(matches!(packet, OscPacket::Message(ref m) if m.addr == "/truth_seeker/arousal"));
    }
}
