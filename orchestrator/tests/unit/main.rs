//! Unit test harness

mod helpers;
mod test_rollout;
