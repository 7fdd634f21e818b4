//! Fake telemetry server - emits synthetic joint and current frames over
//! WebSocket so armview can be run without the robot.
//!
//! Joint angles follow slow sine waves (within the model's limits when a
//! URDF is given), currents are random. Fault injection helps exercise the
//! client's recovery paths.
//!
//! Examples:
//!   fake-telemetry-server                                   # :8080 joints, :8081 currents
//!   fake-telemetry-server --model urdf/myRobot/urdf/robot.urdf
//!   fake-telemetry-server --chaos --drop-after 10           # malformed frames, cut every 10s

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use armview::joints::{derive_joint_infos, JointInfo};
use armview::model::{ModelLoader, ModelRequest, UrdfLoader};
use armview::telemetry::{CurrentSample, JointReading, TelemetryFrame};

/// Serve synthetic joint and current telemetry.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address for the joint-angle endpoint.
    #[arg(long, default_value = "127.0.0.1:8080")]
    joint_addr: SocketAddr,

    /// Address for the motor-current endpoint.
    #[arg(long, default_value = "127.0.0.1:8081")]
    current_addr: SocketAddr,

    /// Take joint names and limits from this URDF.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Joint names to animate when no model is given.
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "joint1,joint2,joint3,joint4,joint5,joint6"
    )]
    joints: Vec<String>,

    /// Motors per arm in current frames.
    #[arg(long, default_value_t = 6)]
    motors: usize,

    /// Frames per second on each endpoint.
    #[arg(long, default_value_t = 20.0)]
    rate: f64,

    /// Mix malformed and unrecognized frames into the streams.
    #[arg(long)]
    chaos: bool,

    /// Close every connection after this many seconds.
    #[arg(long)]
    drop_after: Option<u64>,
}

/// What one endpoint streams.
#[derive(Clone)]
enum Feed {
    Joints(Arc<Vec<JointInfo>>),
    Current { motors: usize },
}

impl Feed {
    fn name(&self) -> &'static str {
        match self {
            Feed::Joints(_) => "joint",
            Feed::Current { .. } => "current",
        }
    }

    fn frame(&self, t: f64, rng: &mut StdRng) -> String {
        let frame = match self {
            Feed::Joints(joints) => TelemetryFrame::JointUpdate {
                data: joints
                    .iter()
                    .enumerate()
                    .map(|(i, joint)| {
                        let (lo, hi) = if joint.is_limited() {
                            (joint.lower, joint.upper)
                        } else {
                            (-90.0, 90.0)
                        };
                        let phase = (t * 0.5 + i as f64 * 0.7).sin() * 0.5 + 0.5;
                        JointReading::new(joint.name.clone(), lo + (hi - lo) * phase)
                    })
                    .collect(),
            },
            Feed::Current { motors } => TelemetryFrame::Current(CurrentSample {
                arm_a: (0..*motors).map(|_| rng.random_range(-2.0..2.0)).collect(),
                arm_b: (0..*motors).map(|_| rng.random_range(-2.0..2.0)).collect(),
            }),
        };
        frame.to_json()
    }
}

/// A frame the client must survive without dropping the connection.
fn malformed(rng: &mut StdRng) -> String {
    match rng.random_range(0..4) {
        0 => r#"{"type":"jointUpdate","data":[{"name":"joint1","deg"#.to_string(),
        1 => "not json at all".to_string(),
        2 => r#"{"type":"heartbeat","seq":1}"#.to_string(),
        _ => r#"{"type":"jointUpdate","data":"oops"}"#.to_string(),
    }
}

#[derive(Clone, Copy)]
struct Settings {
    period: Duration,
    chaos: bool,
    drop_after: Option<Duration>,
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    feed: Feed,
    settings: Settings,
    cancel: CancellationToken,
) -> Result<()> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut write, mut read) = ws.split();
    let mut rng = StdRng::from_os_rng();

    let started = tokio::time::Instant::now();
    let mut tick = tokio::time::interval(settings.period);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = read.next() => match msg {
                Some(Ok(Message::Close(_))) | None => {
                    tracing::info!("[{}] {} closed the connection", feed.name(), peer);
                    return Ok(());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
            _ = tick.tick() => {
                let elapsed = started.elapsed();
                if settings.drop_after.is_some_and(|d| elapsed >= d) {
                    tracing::info!("[{}] dropping {} after {:?}", feed.name(), peer, elapsed);
                    break;
                }

                let text = if settings.chaos && rng.random_bool(0.05) {
                    let bad = malformed(&mut rng);
                    tracing::debug!("[{}] injecting: {}", feed.name(), bad);
                    bad
                } else {
                    feed.frame(elapsed.as_secs_f64(), &mut rng)
                };
                write.send(Message::Text(text)).await?;
            }
        }
    }

    write.send(Message::Close(None)).await.ok();
    Ok(())
}

async fn serve(listener: TcpListener, feed: Feed, settings: Settings, cancel: CancellationToken) {
    loop {
        let (stream, peer) = tokio::select! {
            _ = cancel.cancelled() => return,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!("[{}] accept failed: {}", feed.name(), e);
                    continue;
                }
            },
        };

        tracing::info!("[{}] client connected: {}", feed.name(), peer);
        let feed = feed.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let name = feed.name();
            if let Err(e) = handle_connection(stream, peer, feed, settings, cancel).await {
                tracing::warn!("[{}] connection {} ended: {}", name, peer, e);
            }
        });
    }
}

fn joint_set(args: &Args) -> Result<Vec<JointInfo>> {
    match &args.model {
        Some(path) => {
            let registry = UrdfLoader.load(&ModelRequest::new(path))?;
            Ok(derive_joint_infos(&registry))
        }
        None => Ok(args
            .joints
            .iter()
            .map(|name| JointInfo {
                name: name.clone(),
                lower: f64::NEG_INFINITY,
                upper: f64::INFINITY,
                degree: 0.0,
            })
            .collect()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fake_telemetry_server=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .init();

    let args = Args::parse();
    let joints = joint_set(&args)?;
    let settings = Settings {
        period: Duration::from_secs_f64(1.0 / args.rate.max(0.1)),
        chaos: args.chaos,
        drop_after: args.drop_after.map(Duration::from_secs),
    };

    let joint_listener = TcpListener::bind(args.joint_addr).await?;
    let current_listener = TcpListener::bind(args.current_addr).await?;

    println!();
    println!("========================================");
    println!("Fake Telemetry Server");
    println!("========================================");
    println!("Joints:   ws://{}  ({} joints)", joint_listener.local_addr()?, joints.len());
    println!("Current:  ws://{}  ({} motors/arm)", current_listener.local_addr()?, args.motors);
    println!("Rate:     {} Hz", args.rate);
    println!("Chaos:    {}", if args.chaos { "on" } else { "off" });
    if let Some(secs) = args.drop_after {
        println!("Drops:    every {}s", secs);
    }
    println!("========================================");
    println!();

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Ctrl+C received, stopping...");
        cancel_clone.cancel();
    });

    tokio::join!(
        serve(
            joint_listener,
            Feed::Joints(Arc::new(joints)),
            settings,
            cancel.clone()
        ),
        serve(
            current_listener,
            Feed::Current {
                motors: args.motors
            },
            settings,
            cancel.clone()
        ),
    );
    Ok(())
}
