use std::{
    cmp::min,
    time::{Duration, Instant},
};

use crate::options::{Options, ReadOnlyOptions};

/// Represents the different chess time control formats the `go` command can request.
pub enum TimeControl {
    /// Fixed time per move.
    MoveTime(Duration),

    /// Traditional chess clock with a specified number of moves to the next time control.
    Conventional { time: Duration, moves_to_go: u16 },

    /// Base time plus an increment after each move.
    Incremental { time: Duration, increment: Duration },

    /// The whole game must be completed within the remaining time.
    SuddenDeath { time: Duration },

    /// No time limit: analysis mode, or time managed externally.
    Infinite,
}

impl TimeControl {
    /// Creates a time control from the parameters of a `go` command.
    ///
    /// Selection precedence: `infinite`, then `movetime`, then a clock with `movestogo`, then a
    /// clock with a non-zero increment, then sudden death. With no time parameter at all the
    /// search is infinite.
    pub fn new(
        time: Option<Duration>,
        increment: Option<Duration>,
        moves_to_go: Option<u16>,
        move_time: Option<Duration>,
        infinite: bool,
    ) -> Self {
        if infinite {
            return TimeControl::Infinite;
        }

        if let Some(move_time) = move_time {
            return TimeControl::MoveTime(move_time);
        }

        if let Some(time) = time {
            if let Some(moves_to_go) = moves_to_go {
                return TimeControl::Conventional { time, moves_to_go: moves_to_go.max(1) };
            }

            if let Some(increment) = increment {
                if increment > Duration::ZERO {
                    return TimeControl::Incremental { time, increment };
                }
            }

            return TimeControl::SuddenDeath { time };
        }

        TimeControl::Infinite
    }
}

/// Budgets the thinking time of one search.
///
/// Two deadlines are derived from the time control. The soft deadline is the target allocation
/// for the move; it is only checked between iterations and after the first root move of an
/// iteration, so a started iteration is usually allowed to finish. The hard deadline is a
/// multiple of the allocation, capped well below the remaining clock, and aborts the search
/// wherever it is.
///
/// A fixed `movetime` search has no soft deadline at all: it always runs to its hard deadline,
/// which is the requested time minus a safety margin.
pub struct TimeManager {
    soft_deadline: Option<Duration>,
    hard_deadline: Option<Duration>,
    search_start: Instant,
    iterations_completed: u16,
    iteration_start: Instant,
    last_iteration_durations: [Duration; 2],
}

impl TimeManager {
    const SAFETY_MARGIN: Duration = Duration::from_millis(30);
    const MIN_ITERATIONS: u16 = 1;

    /// Creates a new time manager for the given time control. The clock starts immediately.
    pub fn new(time_control: TimeControl) -> Self {
        let options = Options::get();

        let (soft_deadline, hard_deadline) = match time_control {
            TimeControl::MoveTime(time) => (None, Some(time.saturating_sub(Self::SAFETY_MARGIN))),
            TimeControl::Conventional { time, moves_to_go } => {
                Self::deadlines_from_allocation(time / u32::from(moves_to_go), time, &options)
            }
            TimeControl::Incremental { time, increment } => Self::deadlines_from_allocation(
                time / options.moves_to_go_estimate() + increment,
                time,
                &options,
            ),
            TimeControl::SuddenDeath { time } => {
                Self::deadlines_from_allocation(time / options.moves_to_go_estimate(), time, &options)
            }
            TimeControl::Infinite => (None, None),
        };

        TimeManager {
            soft_deadline,
            hard_deadline,
            search_start: Instant::now(),
            iterations_completed: 0,
            iteration_start: Instant::now(),
            last_iteration_durations: [Duration::ZERO; 2],
        }
    }

    fn deadlines_from_allocation(
        allocation: Duration,
        remaining: Duration,
        options: &impl ReadOnlyOptions,
    ) -> (Option<Duration>, Option<Duration>) {
        let ceiling = remaining
            .saturating_sub(Self::SAFETY_MARGIN)
            .mul_f32(options.max_time_ratio_per_move());
        let allocation = min(allocation, ceiling);
        let hard = min(allocation.mul_f32(options.max_over_target_factor()), ceiling);
        (Some(allocation), Some(hard))
    }

    /// Returns the time elapsed since the search started.
    pub fn elapsed(&self) -> Duration {
        self.search_start.elapsed()
    }

    /// Restarts the clock. Used at `ponderhit`, when the deadlines become meaningful: the time
    /// pondered does not count against the budget.
    pub fn restart(&mut self) {
        self.search_start = Instant::now();
        self.iteration_start = Instant::now();
    }

    /// Records the start time of a new iteration.
    pub fn iteration_started(&mut self) {
        self.iteration_start = Instant::now();
    }

    /// Records the completion of the current iteration, keeping the duration of the last two
    /// for the next-iteration estimate.
    pub fn iteration_finished(&mut self) {
        self.last_iteration_durations[0] = self.last_iteration_durations[1];
        self.last_iteration_durations[1] = self.iteration_start.elapsed();
        self.iterations_completed += 1;
    }

    fn must_continue(&self) -> bool {
        self.iterations_completed < Self::MIN_ITERATIONS
    }

    /// Returns true while the hard deadline has not been reached. Polled from inside the search;
    /// at least one iteration always completes so a best move exists.
    pub fn can_continue(&self) -> bool {
        self.must_continue() || self.hard_deadline.map_or(true, |deadline| self.search_start.elapsed() < deadline)
    }

    /// Returns true if the soft deadline allows going on searching at all: checked after the
    /// first root move of an iteration so a new best move can still be found, but a clearly
    /// exhausted budget stops the search between root moves.
    pub fn soft_deadline_allows_continuing(&self) -> bool {
        self.must_continue()
            || self.soft_deadline.map_or(true, |deadline| self.search_start.elapsed() < deadline)
    }

    /// Returns true if a new iteration should be started: the budget is not exhausted and at
    /// least half of the estimated next iteration fits before the soft deadline.
    pub fn can_start_iteration(&self) -> bool {
        if self.must_continue() {
            return true;
        }

        if !self.can_continue() {
            return false;
        }

        let Some(soft_deadline) = self.soft_deadline else {
            return true;
        };

        let elapsed = self.search_start.elapsed();
        if soft_deadline <= elapsed {
            return false;
        }

        // Estimate the next iteration from the growth rate of the last two.
        let time_before_deadline = soft_deadline - elapsed;
        let [previous, last] = self.last_iteration_durations;
        if previous.is_zero() || last.is_zero() {
            return true;
        }
        let growth = last.as_secs_f64() / previous.as_secs_f64();
        let estimated_next = Duration::from_secs_f64(last.as_secs_f64() * growth);
        estimated_next / 2 < time_before_deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_control_precedence() {
        assert!(matches!(
            TimeControl::new(Some(Duration::from_secs(60)), None, None, None, true),
            TimeControl::Infinite
        ));
        assert!(matches!(
            TimeControl::new(Some(Duration::from_secs(60)), None, None, Some(Duration::from_secs(1)), false),
            TimeControl::MoveTime(_)
        ));
        assert!(matches!(
            TimeControl::new(Some(Duration::from_secs(60)), None, Some(40), None, false),
            TimeControl::Conventional { .. }
        ));
        assert!(matches!(
            TimeControl::new(Some(Duration::from_secs(60)), Some(Duration::from_secs(1)), None, None, false),
            TimeControl::Incremental { .. }
        ));
        assert!(matches!(
            TimeControl::new(Some(Duration::from_secs(60)), None, None, None, false),
            TimeControl::SuddenDeath { .. }
        ));
        assert!(matches!(TimeControl::new(None, None, None, None, false), TimeControl::Infinite));
    }

    #[test]
    fn test_infinite_never_expires() {
        let manager = TimeManager::new(TimeControl::Infinite);
        assert!(manager.can_continue());
        assert!(manager.soft_deadline_allows_continuing());
        assert!(manager.can_start_iteration());
    }

    #[test]
    fn test_move_time_has_no_soft_deadline() {
        let mut manager = TimeManager::new(TimeControl::MoveTime(Duration::from_secs(10)));
        manager.iteration_started();
        manager.iteration_finished();
        // Past the minimum iterations, the soft deadline still never triggers.
        assert!(manager.soft_deadline_allows_continuing());
        assert!(manager.can_start_iteration());
        assert!(manager.can_continue());
    }

    #[test]
    fn test_expired_move_time_stops_the_search() {
        let mut manager = TimeManager::new(TimeControl::MoveTime(Duration::from_millis(1)));
        manager.iteration_started();
        manager.iteration_finished();
        std::thread::sleep(Duration::from_millis(5));
        assert!(!manager.can_continue());
    }

    #[test]
    fn test_minimum_one_iteration() {
        let manager = TimeManager::new(TimeControl::MoveTime(Duration::ZERO));
        // Even with no time at all, the first iteration must run so a move is produced.
        assert!(manager.can_continue());
        assert!(manager.can_start_iteration());
    }

    #[test]
    fn test_conventional_deadlines_are_bounded_by_remaining_time() {
        let mut manager =
            TimeManager::new(TimeControl::Conventional { time: Duration::from_secs(60), moves_to_go: 1 });
        manager.iteration_started();
        manager.iteration_finished();

        let hard = manager.hard_deadline.unwrap();
        assert!(hard < Duration::from_secs(60));
    }
}
