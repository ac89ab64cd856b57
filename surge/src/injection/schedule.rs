use super::{Arrival, InjectionProfile, ProfileCursor};
use crate::scenario::Scenario;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

/// A scenario paired with the profile its users arrive by.
#[derive(Debug, Clone)]
pub struct Population {
    pub scenario: Arc<Scenario>,
    pub profile: InjectionProfile,
}

#[derive(Debug, Clone)]
pub struct StartEvent {
    pub at: Instant,
    pub offset: Duration,
    pub scenario: Arc<Scenario>,
    pub user_id: u64,
}

/// The k-way merge of every population's cursor.
///
/// Events come out in non-decreasing offset order. Equal offsets keep the
/// order in which populations were registered.
pub struct Schedule {
    start: Instant,
    scenarios: Vec<Arc<Scenario>>,
    cursors: Vec<ProfileCursor>,
    // (offset, population, remaining users). One entry per live cursor.
    heap: BinaryHeap<Reverse<(Duration, usize, u64)>>,
    current: Option<(usize, Arrival)>,
    next_user_id: u64,
}

impl Schedule {
    pub fn new(populations: &[Population], start: Instant, seed: Option<u64>) -> Self {
        let mut schedule = Self {
            start,
            scenarios: Vec::with_capacity(populations.len()),
            cursors: Vec::with_capacity(populations.len()),
            heap: BinaryHeap::with_capacity(populations.len()),
            current: None,
            next_user_id: 0,
        };

        for (idx, population) in populations.iter().enumerate() {
            let seed = seed.map(|seed| seed.wrapping_add(idx as u64));
            schedule.scenarios.push(population.scenario.clone());
            schedule.cursors.push(population.profile.cursor(seed));
            schedule.advance(idx);
        }
        schedule
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    /// Populations that still have arrivals ahead of them.
    pub fn active_profiles(&self) -> usize {
        self.heap.len() + usize::from(self.current.is_some())
    }

    fn advance(&mut self, idx: usize) {
        if let Some(arrival) = self.cursors[idx].next() {
            self.heap
                .push(Reverse((arrival.offset, idx, arrival.count)));
        }
    }
}

impl Iterator for Schedule {
    type Item = StartEvent;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match &mut self.current {
                Some((idx, arrival)) if arrival.count > 0 => {
                    let Some(at) = self.start.checked_add(arrival.offset) else {
                        warn!("Start offset {:?} is out of range; ending the schedule.", arrival.offset);
                        self.current = None;
                        self.heap.clear();
                        return None;
                    };
                    arrival.count -= 1;
                    let user_id = self.next_user_id;
                    self.next_user_id += 1;
                    return Some(StartEvent {
                        at,
                        offset: arrival.offset,
                        scenario: self.scenarios[*idx].clone(),
                        user_id,
                    });
                }
                Some((idx, _)) => {
                    let idx = *idx;
                    self.current = None;
                    self.advance(idx);
                }
                None => {
                    let Reverse((offset, idx, count)) = self.heap.pop()?;
                    self.current = Some((idx, Arrival { offset, count }));
                }
            }
        }
    }
}
