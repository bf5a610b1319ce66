use super::*;

const MB: f64 = 1_000_000.0;

fn config(ceiling: u64) -> ThrottleConfig {
    ThrottleConfig {
        ceiling_bytes_per_sec: Some(ceiling),
        ..ThrottleConfig::default()
    }
}

/// Slots whose speed is the lower of their natural capacity and their cap.
struct Sim {
    ctl: ThrottleController,
    capacity: Vec<f64>,
    throttled: Vec<bool>,
    downloading: Vec<bool>,
    now: Instant,
}

impl Sim {
    fn new(cfg: &ThrottleConfig, capacity: &[f64]) -> Self {
        Self {
            ctl: ThrottleController::new(cfg),
            capacity: capacity.to_vec(),
            throttled: vec![true; capacity.len()],
            downloading: vec![true; capacity.len()],
            now: Instant::now(),
        }
    }

    fn samples(&self) -> Vec<SlotSample> {
        (0..self.capacity.len())
            .map(|slot| {
                let cap = if self.throttled[slot] {
                    self.ctl
                        .cap_for(slot)
                        .map(|c| c as f64)
                        .unwrap_or(f64::INFINITY)
                } else {
                    f64::INFINITY
                };
                SlotSample {
                    slot,
                    speed: self.capacity[slot].min(cap),
                    paused: false,
                    downloading: self.downloading[slot],
                    throttled: self.throttled[slot],
                }
            })
            .collect()
    }

    fn step(&mut self, secs: u64) -> Vec<CapChange> {
        self.now += Duration::from_secs(secs);
        let samples = self.samples();
        self.ctl.tick(self.now, &samples)
    }

    fn aggregate(&self) -> f64 {
        self.samples()
            .iter()
            .filter(|s| s.downloading && !s.paused)
            .map(|s| s.speed)
            .sum()
    }
}

#[test]
fn no_ceiling_never_caps() {
    let mut sim = Sim::new(&ThrottleConfig::default(), &[50.0 * MB, 20.0 * MB]);
    assert!(sim.step(1).is_empty());
    assert!((sim.ctl.aggregate() - 70.0 * MB).abs() < 1.0);
    assert!(sim.ctl.admits_new_work());
    assert_eq!(sim.ctl.cap_for(0), None);
}

#[test]
fn converges_below_ceiling_and_stays() {
    let ceiling = 6_000_000;
    let mut sim = Sim::new(&config(ceiling), &[8.0 * MB, 4.0 * MB, 2.0 * MB, 1.0 * MB]);
    let first = sim.step(1);
    assert_eq!(first.len(), 4);
    for _ in 0..10 {
        sim.step(1);
    }
    assert!(sim.aggregate() <= ceiling as f64 * 1.05);
    for _ in 0..60 {
        assert!(sim.step(1).is_empty(), "caps changed with stable inputs");
        assert!(sim.aggregate() <= ceiling as f64 * 1.05);
    }
}

#[test]
fn converges_with_many_fast_slots() {
    let ceiling = 10_000_000;
    let capacity: Vec<f64> = (1..=8).map(|i| i as f64 * 3.0 * MB).collect();
    let mut sim = Sim::new(&config(ceiling), &capacity);
    let mut converged_at = None;
    for tick in 0..30 {
        sim.step(1);
        if converged_at.is_none() && sim.aggregate() <= ceiling as f64 * 1.05 {
            converged_at = Some(tick);
        }
    }
    assert!(converged_at.is_some());
    assert!(sim.aggregate() <= ceiling as f64 * 1.05);
}

#[test]
fn inside_band_is_left_alone() {
    let ceiling = 10_000_000;
    let mut sim = Sim::new(&config(ceiling), &[5.2 * MB, 5.2 * MB]);
    // 10.4 MB/s is above the ceiling but inside the high-water mark.
    assert!(sim.step(1).is_empty());
    assert!(!sim.ctl.admits_new_work());
}

#[test]
fn baseline_slots_shrink_the_budget_after_cooldown() {
    let ceiling = 10_000_000;
    let mut sim = Sim::new(&config(ceiling), &[8.0 * MB, 8.0 * MB]);
    sim.step(1);
    assert_eq!(sim.ctl.cap_for(0), Some(5_000_000));

    // Slot 1 switches to an uncapped tool and runs at 8 MB/s.
    sim.throttled[1] = false;
    assert!(sim.step(1).is_empty(), "scale-down cooldown not yet over");
    let changes = sim.step(5);
    assert_eq!(
        changes,
        vec![CapChange {
            slot: 0,
            cap: 2_000_000,
            previous: Some(5_000_000)
        }]
    );
}

#[test]
fn grows_back_when_load_drops() {
    let ceiling = 10_000_000;
    let mut sim = Sim::new(&config(ceiling), &[8.0 * MB, 8.0 * MB]);
    sim.step(1);
    assert_eq!(sim.ctl.cap_for(0), Some(5_000_000));

    sim.downloading[1] = false;
    assert!(sim.step(1).is_empty(), "scale-up cooldown not yet over");
    let changes = sim.step(20);
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].cap, 6_250_000);
    // 6.25 MB/s is inside the band: no further growth.
    assert!(sim.step(30).is_empty());
}

#[test]
fn paused_slots_do_not_count() {
    let mut ctl = ThrottleController::new(&config(10_000_000));
    let samples = [
        SlotSample {
            slot: 0,
            speed: 9.0 * MB,
            paused: true,
            downloading: true,
            throttled: true,
        },
        SlotSample {
            slot: 1,
            speed: 2.0 * MB,
            paused: false,
            downloading: true,
            throttled: true,
        },
    ];
    assert!(ctl.tick(Instant::now(), &samples).is_empty());
    assert!((ctl.aggregate() - 2.0 * MB).abs() < 1.0);
}

#[test]
fn caps_respect_floor_and_slot_max() {
    let cfg = ThrottleConfig {
        ceiling_bytes_per_sec: Some(1_000_000),
        slot_max_bytes_per_sec: Some(400_000),
        floor_bytes_per_sec: 300_000,
        ..ThrottleConfig::default()
    };
    let ctl = ThrottleController::new(&cfg);
    assert_eq!(ctl.cap_for(3), Some(400_000));

    let mut sim = Sim::new(&cfg, &[5.0 * MB, 5.0 * MB, 5.0 * MB, 5.0 * MB]);
    sim.step(1);
    for slot in 0..4 {
        let cap = sim.ctl.cap_for(slot).unwrap();
        assert!(
            (300_000..=400_000).contains(&cap),
            "slot {} cap {}",
            slot,
            cap
        );
    }
}
