//! Sensorless rotor estimation and feed-forward voltage core for PMSM
//! field-oriented control.
//!
//! Two cooperating subsystems, both in signed 16/32-bit fixed point:
//!
//! - A discrete-time Luenberger observer ([`observer::StateObserver`])
//!   estimating stator currents and back-EMF in the stationary (alpha, beta)
//!   frame, with a PLL tracking rotor electrical angle and speed from the
//!   estimated back-EMF. It also judges whether its estimates are reliable
//!   enough to close the outer speed loop.
//! - A feed-forward voltage generator ([`feed_forward::FeedForward`]) that
//!   pre-biases the current PI controllers from the reference currents, the
//!   bus voltage and the measured speed.
//!
//! The observer step is meant to run inside the current-loop ISR (one call
//! per PWM period); averaging, reliability, convergence and the feed-forward
//! phases run at the slower speed-loop rate. Nothing here allocates, blocks,
//! or loops over anything not bounded at compile time.
//!
//! Angle convention: s16 electrical degrees, the full signed 16-bit range
//! mapping to one electrical revolution. Speeds are `dpp` (the s16 angle
//! increment per observer tick) internally and tenths of a hertz (`dhz`)
//! toward the outer loop.

#![cfg_attr(not(test), no_std)]

pub mod feed_forward;
pub mod math;
pub mod observer;
pub mod pid;
pub mod pll;
pub mod speed_pos;

/// A component pair in the stationary two-phase (alpha, beta) frame.
/// Used for both currents and voltages.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AlphaBeta {
    pub alpha: i16,
    pub beta: i16,
}

/// A component pair in the rotating (q, d) frame aligned with the rotor flux.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Qd {
    pub q: i16,
    pub d: i16,
}
