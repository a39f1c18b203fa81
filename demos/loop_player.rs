//! Loop a section of an Ogg Vorbis file
//!
//! Run with: cargo run --example loop_player --features cpal_sink,vorbis_src -- song.ogg 30 45
//!
//! Plays the file with the loop between the two times (in seconds) for a
//! while, then releases the loop and lets the track play out.

use std::io::Write;
use std::thread::sleep;
use std::time::{Duration, Instant};

use schleife::{CpalDevice, Player, ThreadDriver};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let path = args.next().ok_or("usage: loop_player <file.ogg> [start] [end]")?;
    let start: f64 = args.next().map(|s| s.parse()).transpose()?.unwrap_or(0.0);
    let end: f64 = args.next().map(|s| s.parse()).transpose()?.unwrap_or(4.0);

    let device = CpalDevice::default_output().ok_or("No audio device")?;
    println!("Output: {} ({} Hz)", device.name(), device.sample_rate());
    let sink = device.create_sink()?;

    let mut player = Player::new(ThreadDriver::default(), device.sample_rate(), sink);
    player.load_vorbis(&path, None)?;
    player.set_loop_seconds(true, start, end);
    player.play()?;

    println!("Looping {:.2}s - {:.2}s for 20 seconds... Ctrl+C to stop", start, end);
    let begin = Instant::now();
    let mut released = false;

    while player.is_playing() {
        let now = Instant::now();
        player.update(now);

        if !released && now.duration_since(begin) > Duration::from_secs(20) {
            println!("Releasing the loop");
            let (s, e) = (player.loop_region().start_seconds(), player.loop_region().end_seconds());
            player.set_loop_seconds(false, s, e);
            released = true;
        }

        let status = player.status();
        print!("\r{:7.2}s / {:7.2}s  level {:.2}  {:?}      ", status.current_time, status.duration, status.audio_level, player.phase());
        std::io::stdout().flush()?;
        sleep(Duration::from_millis(5));
    }
    println!();
    Ok(())
}
