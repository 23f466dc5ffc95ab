// Keyboard teleop: W/S drive, A/D turn, Z/X rotate base, space stop, R/F speed, Q quit
//
// Holds a liveliness token under rover/clients while running, so quitting (or
// crashing) makes the runtime stop the motors.
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use rover_zenoh_runtime::config::{TOPIC_ALIVE, TOPIC_CLIENT_PREFIX, TOPIC_CMD, TOPIC_CMD_REPLY};

const SPEEDS: [i16; 3] = [80, 150, 255];
const INPUT_TIMEOUT_MS: u64 = 300; // Stop after this much time with no movement key

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    check_alive(&session).await?;

    let _token = session
        .liveliness()
        .declare_token(format!("{}/{}", TOPIC_CLIENT_PREFIX, session.zid()))
        .await?;
    let publisher = session.declare_publisher(TOPIC_CMD).await?;
    let replies = session.declare_subscriber(TOPIC_CMD_REPLY).await?;

    info!("Controls: W/S=drive, A/D=turn, Z/X=base, SPACE=stop, R/F=speed, Q=quit");
    print_speed(0);

    enable_raw_mode()?;
    let result = run_teleop(&publisher, &replies).await;
    disable_raw_mode()?;

    publisher.put("stop").await?;
    result
}

async fn check_alive(session: &zenoh::Session) -> Result<(), BoxError> {
    let answers = session.get(TOPIC_ALIVE).timeout(Duration::from_secs(2)).await?;
    match answers.recv_async().await {
        Ok(reply) => match reply.result() {
            Ok(sample) => {
                info!("Runtime: {}", String::from_utf8_lossy(&sample.payload().to_bytes()));
                Ok(())
            }
            Err(e) => Err(format!("Liveness check failed: {:?}", e).into()),
        },
        Err(_) => Err("No rover runtime answered the liveness check".into()),
    }
}

async fn run_teleop(
    publisher: &zenoh::pubsub::Publisher<'_>,
    replies: &zenoh::pubsub::Subscriber<zenoh::handlers::FifoChannelHandler<zenoh::sample::Sample>>,
) -> Result<(), BoxError> {
    let mut speed_idx: usize = 0;

    let mut tracks_moving = false;
    let mut base_moving = false;
    let mut last_tracks_input = Instant::now();
    let mut last_base_input = Instant::now();

    loop {
        let mut command = None;

        // Poll for key with 20ms timeout
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;
                let speed = SPEEDS[speed_idx];

                match code {
                    // Tracks
                    KeyCode::Char('w') if pressed => command = Some(format!("forward:{}", speed)),
                    KeyCode::Char('s') if pressed => command = Some(format!("forward:{}", -speed)),
                    KeyCode::Char('a') if pressed => command = Some(format!("turnLeft:{}", speed)),
                    KeyCode::Char('d') if pressed => command = Some(format!("turnRight:{}", speed)),

                    // Base
                    KeyCode::Char('z') if pressed => command = Some(format!("base:{}", speed)),
                    KeyCode::Char('x') if pressed => command = Some(format!("base:{}", -speed)),

                    KeyCode::Char(' ') if pressed => command = Some("stop".to_string()),

                    // Speed control
                    KeyCode::Char('r') if pressed => {
                        speed_idx = (speed_idx + 1).min(SPEEDS.len() - 1);
                        print_speed(speed_idx);
                    }
                    KeyCode::Char('f') if pressed => {
                        speed_idx = speed_idx.saturating_sub(1);
                        print_speed(speed_idx);
                    }

                    // Quit
                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        if let Some(ref cmd) = command {
            if cmd.starts_with("base") {
                base_moving = true;
                last_base_input = Instant::now();
            } else if cmd == "stop" {
                tracks_moving = false;
                base_moving = false;
            } else {
                tracks_moving = true;
                last_tracks_input = Instant::now();
            }
        }

        // Key released (no repeats arriving): stop that group
        let timeout = Duration::from_millis(INPUT_TIMEOUT_MS);
        if command.is_none() && tracks_moving && last_tracks_input.elapsed() > timeout {
            tracks_moving = false;
            command = Some("stopTracks".to_string());
        } else if command.is_none() && base_moving && last_base_input.elapsed() > timeout {
            base_moving = false;
            command = Some("stopBase".to_string());
        }

        if let Some(cmd) = command {
            publisher.put(cmd).await?;
        }

        while let Ok(Some(sample)) = replies.try_recv() {
            let text = String::from_utf8_lossy(&sample.payload().to_bytes()).into_owned();
            if text.starts_with("VALID") {
                info!("{}", text);
            } else {
                warn!("{}", text);
            }
        }
    }

    Ok(())
}

fn print_speed(idx: usize) {
    let label = ["LOW", "MED", "HIGH"][idx];
    info!("Speed: {} ({})", label, SPEEDS[idx]);
}
