use std::time::{Duration, Instant};

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rtrb::{Consumer, RingBuffer};
use schleife::{AudioSource, EqBand, ManualDriver, MemorySource, Player, RtrbSink, BLOCK_FRAMES};

const RATE: u32 = 48000;

fn looping_player() -> (Player<ManualDriver>, Consumer<f32>) {
    let samples = (0..RATE as usize * 10 * 2).map(|i| ((i as f32) * 0.001).sin() * 0.5).collect();
    let source = AudioSource::new(MemorySource::new(samples, 2, RATE).unwrap()).unwrap();

    let (tx, rx) = RingBuffer::new(BLOCK_FRAMES * 2 * 4);
    let mut player = Player::new(ManualDriver::new(), RATE, RtrbSink::stereo(tx));
    player.load(source, None).unwrap();
    player.set_loop_seconds(true, 1.0, 1.5);
    player.play().unwrap();
    (player, rx)
}

fn render_block(player: &mut Player<ManualDriver>, rx: &mut Consumer<f32>, now: &mut Instant) {
    player.driver_mut().render_blocks(1);
    *now += Duration::from_micros(1333);
    player.update(*now);
    if let Ok(chunk) = rx.read_chunk(rx.slots()) {
        black_box(chunk.as_slices());
        chunk.commit_all();
    }
}

pub fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("Player block, bypassed chain", |b| {
        let (mut player, mut rx) = looping_player();
        let mut now = Instant::now();
        b.iter(|| render_block(&mut player, &mut rx, &mut now))
    });

    c.bench_function("Player block, pitch + eq", |b| {
        let (mut player, mut rx) = looping_player();
        player.set_pitch_semitones(3.0);
        player.set_eq_gain(EqBand::Bass, 6.0);
        player.set_eq_gain(EqBand::Treble, -4.0);
        let mut now = Instant::now();
        b.iter(|| render_block(&mut player, &mut rx, &mut now))
    });

    c.bench_function("Player block, varispeed", |b| {
        let (mut player, mut rx) = looping_player();
        player.set_tempo_rate(1.13);
        let mut now = Instant::now();
        b.iter(|| render_block(&mut player, &mut rx, &mut now))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
