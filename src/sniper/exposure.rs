//! Daily exposure accounting

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Budget committed on one UTC day
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub amount: f64,
    pub day: NaiveDate,
}

#[derive(Debug)]
struct ExposureState {
    day: NaiveDate,
    used: f64,
}

/// Tracks how much of the daily budget has been committed.
///
/// Sizing and reservation happen under one lock so concurrent candidates
/// cannot both claim the last of the budget.
#[derive(Debug)]
pub struct ExposureTracker {
    max_daily: f64,
    state: Mutex<ExposureState>,
}

impl ExposureTracker {
    pub fn new(max_daily: f64) -> Self {
        Self {
            max_daily,
            state: Mutex::new(ExposureState {
                day: Utc::now().date_naive(),
                used: 0.0,
            }),
        }
    }

    fn roll_day(state: &mut ExposureState, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today > state.day {
            info!(
                previous_day = %state.day,
                used = state.used,
                "Daily exposure reset"
            );
            state.day = today;
            state.used = 0.0;
        }
    }

    pub async fn current(&self) -> f64 {
        let mut state = self.state.lock().await;
        Self::roll_day(&mut state, Utc::now());
        state.used
    }

    pub async fn remaining(&self) -> f64 {
        (self.max_daily - self.current().await).max(0.0)
    }

    /// Size via `size_fn(remaining)` and commit the result if positive.
    /// Returns the reservation, or `None` when nothing fits.
    pub async fn reserve_with<F>(&self, size_fn: F) -> Option<Reservation>
    where
        F: FnOnce(f64) -> f64,
    {
        self.reserve_at(Utc::now(), size_fn).await
    }

    async fn reserve_at<F>(&self, now: DateTime<Utc>, size_fn: F) -> Option<Reservation>
    where
        F: FnOnce(f64) -> f64,
    {
        let mut state = self.state.lock().await;
        Self::roll_day(&mut state, now);
        let remaining = self.max_daily - state.used;
        let size = size_fn(remaining);
        if !size.is_finite() || size <= 0.0 || size > remaining + f64::EPSILON {
            return None;
        }
        state.used += size;
        Some(Reservation {
            amount: size,
            day: state.day,
        })
    }

    /// Return a reservation whose trade never executed. Reservations from a
    /// day that has already rolled over are dropped.
    pub async fn release(&self, reservation: Reservation) {
        self.release_at(Utc::now(), reservation).await
    }

    async fn release_at(&self, now: DateTime<Utc>, reservation: Reservation) {
        let mut state = self.state.lock().await;
        Self::roll_day(&mut state, now);
        if reservation.day != state.day {
            debug!(day = %reservation.day, "Stale reservation, nothing to release");
            return;
        }
        state.used = (state.used - reservation.amount).max(0.0);
    }
}
