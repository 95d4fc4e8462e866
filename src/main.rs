//! Trackside headless demo
//!
//! Runs one full match lifecycle with seeded bot racers and logs the
//! standings and roll-call. Usage: `trackside [settings.json] [course.json] [seed]`

#[cfg(not(target_arch = "wasm32"))]
mod demo {
    use std::time::Duration;

    use glam::Vec3;
    use rand::{Rng, SeedableRng};
    use rand_pcg::Pcg32;

    use trackside::sim::{EventKind, MatchPhase, ParticipantId, RaceEvent, RaceSession};
    use trackside::{CourseSettings, MatchSettings, RaceError};

    /// Simulation frame (60 Hz)
    const FRAME: Duration = Duration::from_micros(16_667);
    /// Hard stop for the demo loop
    const MAX_FRAMES: u32 = 60 * 60 * 5;
    const BOT_NAMES: [&str; 6] = ["Vex", "Pip", "Mako", "Juno", "Rook", "Tilde"];

    /// A scripted racer that drifts along the course at its own pace
    struct Bot {
        id: ParticipantId,
        /// Progress per second
        pace: f32,
        /// Sideways wobble amplitude
        wobble: f32,
        t: f32,
        done: bool,
    }

    pub fn run(args: &[String]) -> Result<(), RaceError> {
        let settings = match args.get(1) {
            Some(path) => MatchSettings::load(path)?,
            None => MatchSettings {
                min_players: 3,
                ..Default::default()
            },
        };
        let course = match args.get(2) {
            Some(path) => {
                let json = std::fs::read_to_string(path).map_err(trackside::ConfigError::from)?;
                CourseSettings::from_json_str(&json)?
            }
            None => CourseSettings::default(),
        };
        let seed = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(42_u64);

        let mut session = RaceSession::new(settings, &course)?;
        let board = session.subscribe(&[
            EventKind::MatchStateChanged,
            EventKind::MatchStartCountdown,
            EventKind::RollCallUpdate,
        ]);

        let mut rng = Pcg32::seed_from_u64(seed);
        let mut bots: Vec<Bot> = BOT_NAMES
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let id = ParticipantId(i as u32 + 1);
                session.join(id, *name);
                Bot {
                    id,
                    pace: rng.random_range(0.035..0.06),
                    wobble: rng.random_range(0.0..1.5),
                    t: 0.0,
                    done: false,
                }
            })
            .collect();
        for bot in &bots {
            session.queue(bot.id);
        }

        let mut seen_race = false;
        for frame in 0..MAX_FRAMES {
            let dt = FRAME.as_secs_f32();
            if matches!(session.phase(), MatchPhase::PlayingMatch | MatchPhase::EndingMatch) {
                for bot in bots.iter_mut().filter(|b| !b.done) {
                    bot.t = (bot.t + bot.pace * dt).min(1.0);
                    let side = (frame as f32 * 0.05 + bot.id.0 as f32).sin() * bot.wobble;
                    let pos = session.tracker().curve().interpolate(bot.t) + Vec3::new(0.0, 0.0, side);
                    session.report_position(bot.id, pos);
                    if bot.t >= 1.0 {
                        bot.done = true;
                        session.goal_reached(bot.id, frame as f32 * dt);
                    }
                }
            }

            session.update(FRAME);

            for event in board.drain() {
                match event {
                    RaceEvent::MatchStateChanged { from, to } => {
                        log::info!("[board] {} -> {}", from.as_str(), to.as_str());
                        seen_race |= to == MatchPhase::PlayingMatch;
                    }
                    RaceEvent::MatchStartCountdown { ms_remaining } => {
                        log::info!("[board] starting in {}s", ms_remaining / 1000);
                    }
                    RaceEvent::RollCallUpdate { text } => println!("{}", text),
                    _ => {}
                }
            }

            if seen_race && session.phase() == MatchPhase::ReadyForMatch {
                log::info!("Match complete after {} frames", frame + 1);
                return Ok(());
            }
        }

        log::warn!("Demo stopped after {} frames without finishing", MAX_FRAMES);
        Ok(())
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn main() {
    env_logger::init();
    log::info!("Trackside (native) starting...");

    let args: Vec<String> = std::env::args().collect();
    if let Err(err) = demo::run(&args) {
        log::error!("{}", err);
        std::process::exit(1);
    }
}

#[cfg(target_arch = "wasm32")]
fn main() {
    // The library is embedded by a host; there is no standalone wasm entry point
}
