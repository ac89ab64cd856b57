use rand::rngs::SmallRng;
use rand::Rng;
use std::time::Duration;

/// Think time between two actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pause {
    Fixed(Duration),
    /// Drawn uniformly from `min..=max` on every run.
    Uniform { min: Duration, max: Duration },
}

impl Pause {
    pub(crate) fn duration(&self, rng: &mut SmallRng) -> Duration {
        match *self {
            Pause::Fixed(dur) => dur,
            Pause::Uniform { min, max } if min >= max => min,
            Pause::Uniform { min, max } => rng.gen_range(min..=max),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn uniform_stays_in_range() {
        let mut rng = SmallRng::seed_from_u64(42);
        let pause = Pause::Uniform {
            min: Duration::from_millis(100),
            max: Duration::from_millis(200),
        };
        for _ in 0..1_000 {
            let dur = pause.duration(&mut rng);
            assert!(dur >= Duration::from_millis(100));
            assert!(dur <= Duration::from_millis(200));
        }
    }

    #[test]
    fn inverted_range_uses_min() {
        let mut rng = SmallRng::seed_from_u64(42);
        let pause = Pause::Uniform {
            min: Duration::from_secs(3),
            max: Duration::from_secs(1),
        };
        assert_eq!(pause.duration(&mut rng), Duration::from_secs(3));
    }
}
