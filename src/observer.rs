//! Luenberger state observer for sensorless rotor position and speed, with
//! the PLL, the speed-averaging buffer, and the reliability, consistency and
//! convergence logic layered on top of it.
//!
//! `step` runs at the current-loop rate (one call per PWM period, from the
//! ISR). `compute_avg_el_speed_dpp`, `compute_avg_mec_speed_dhz` and
//! `is_observer_converged` run at the speed-loop rate. Parameter setters are
//! for background context.

use crate::pid::PiParams;
use crate::pll::SpeedPll;
use crate::speed_pos::{SpeedPosition, SpeedPositionParams, SpeedSensor};
use crate::AlphaBeta;

// Factors of the C6 cross-coupling gain derivation. C6 scales the estimated
// back-EMF by speed so the term stays in range for the F2/F3 scaling picked
// at init.
const C6_COMP_CONST1: i32 = 1_043_038;
const C6_COMP_CONST2: i32 = 10_430;

/// Compile-time capacity of the speed FIFO. Configured sizes must not
/// exceed it.
pub const SPEED_BUFFER_CAPACITY: usize = 64;

/// Observer gains and the fixed-point scaling factors of the current and
/// back-EMF integrators. `f1` and `f2` must be powers of two matching their
/// shift counts.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ObserverGains {
    pub c1: i16,
    pub c2: i16,
    pub c3: i16,
    pub c4: i16,
    pub c5: i16,
    pub f1: i16,
    pub f2: i16,
    pub f1_log: u8,
    pub f2_log: u8,
}

/// Everything needed to construct a [`StateObserver`].
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ObserverParams {
    pub gains: ObserverGains,
    pub pll: PiParams,
    pub base: SpeedPositionParams,

    /// Speed FIFO depth used for the mechanical-speed report (`N01Hz`).
    pub speed_buffer_size_dhz: u8,
    /// Rolling-window depth for the electrical dpp average (`Ndpp`), a power
    /// of two not larger than the FIFO depth.
    pub speed_buffer_size_dpp: u8,
    pub speed_buffer_size_dpp_log: u8,

    /// Maximum accepted speed variance, as a fraction of the squared average
    /// in 1/128 units.
    pub variance_percentage: u16,
    /// Consecutive failed checks tolerated after convergence before the
    /// estimate is reported unreliable.
    pub reliability_hysteresis: u8,

    /// Consecutive in-band estimates required to declare startup
    /// convergence.
    pub startup_consist_threshold: u8,
    /// Upper startup validation band, in 1/16 of the forced speed.
    pub speed_validation_band_h: u8,
    /// Lower startup validation band, in 1/16 of the forced speed.
    pub speed_validation_band_l: u8,
    /// Minimum estimated mechanical speed (tenths of Hz, absolute) accepted
    /// during startup validation.
    pub min_startup_valid_speed_dhz: u16,

    /// Mechanical speed (tenths of Hz) above which the back-EMF consistency
    /// check is skipped.
    pub max_app_positive_mec_speed_dhz: u16,
    /// Expected back-EMF amplitude gain for the consistency check, in 1/64
    /// units.
    pub bemf_consistency_gain: u16,
    /// Tolerance of the consistency check, in 1/64 units below the expected
    /// level.
    pub bemf_consistency_check: u16,
}

/// Inputs to one observer step, sampled in the current-loop ISR.
#[derive(Clone, Copy, Default, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ObserverInputs {
    /// Measured stator currents in the (alpha, beta) frame.
    pub i_alpha_beta: AlphaBeta,
    /// Applied stator voltage commands as a fraction of full modulation.
    pub v_alpha_beta: AlphaBeta,
    /// Instantaneous bus voltage, same normalization as the commands.
    pub v_bus: u16,
}

/// The state observer itself. One instance per motor; all state is
/// self-contained.
pub struct StateObserver {
    base: SpeedPosition,
    pll: SpeedPll,

    gains: ObserverGains,
    c6: i16,
    f3_pow2: u8,

    // Integrator states, scaled by f1 (currents) and f2 (back-EMF).
    i_alpha_est: i32,
    i_beta_est: i32,
    bemf_alpha_est: i32,
    bemf_beta_est: i32,
    // Last decimated back-EMF, consumed by the consistency check.
    bemf_alpha: i16,
    bemf_beta: i16,

    speed_buffer: [i16; SPEED_BUFFER_CAPACITY],
    speed_buffer_index: u8,
    speed_buffer_oldest: i16,
    dpp_buffer_sum: i32,

    buffer_size_dhz: u8,
    buffer_size_dpp: u8,
    buffer_size_dpp_log: u8,
    variance_percentage: u16,
    reliability_hysteresis: u8,
    startup_consist_threshold: u8,
    band_h: u8,
    band_l: u8,
    min_startup_valid_speed_dhz: u16,
    max_app_positive_mec_speed_dhz: u16,
    bemf_consistency_gain: u16,
    bemf_consistency_check: u16,

    dual_check_enabled: bool,
    is_speed_reliable: bool,
    is_bemf_consistent: bool,
    is_converged: bool,
    force_converge: bool,
    force_converge2: bool,
    reliability_counter: u8,
    consistency_counter: u8,
    obs_bemf_level: i32,
    est_bemf_level: i32,
}

impl StateObserver {
    pub fn new(params: ObserverParams) -> Self {
        let g = params.gains;
        debug_assert!(g.f1 == 1 << g.f1_log && g.f2 == 1 << g.f2_log);
        debug_assert!(params.speed_buffer_size_dpp > 0);
        debug_assert!(params.speed_buffer_size_dpp == 1 << params.speed_buffer_size_dpp_log);
        debug_assert!(params.speed_buffer_size_dhz >= params.speed_buffer_size_dpp);
        debug_assert!(params.speed_buffer_size_dhz as usize <= SPEED_BUFFER_CAPACITY);

        // Derive the back-EMF cross-coupling scaling: halve C6_COMP_CONST1/F2
        // until it reaches zero; the iteration count sizes F3 = 2^F3POW2 and
        // C6 = F2 * F3 / C6_COMP_CONST2.
        let mut temp = (C6_COMP_CONST1 / g.f2 as i32) as i16;
        let mut f3: i32 = 1;
        let mut f3_pow2: u8 = 0;
        while temp != 0 {
            temp /= 2;
            f3 *= 2;
            f3_pow2 += 1;
        }
        let c6 = ((g.f2 as i32 * f3) / C6_COMP_CONST2) as i16;

        Self {
            base: SpeedPosition::new(params.base),
            pll: SpeedPll::new(params.pll),
            gains: g,
            c6,
            f3_pow2,
            i_alpha_est: 0,
            i_beta_est: 0,
            bemf_alpha_est: 0,
            bemf_beta_est: 0,
            bemf_alpha: 0,
            bemf_beta: 0,
            speed_buffer: [0; SPEED_BUFFER_CAPACITY],
            speed_buffer_index: 0,
            speed_buffer_oldest: 0,
            dpp_buffer_sum: 0,
            buffer_size_dhz: params.speed_buffer_size_dhz,
            buffer_size_dpp: params.speed_buffer_size_dpp,
            buffer_size_dpp_log: params.speed_buffer_size_dpp_log,
            variance_percentage: params.variance_percentage,
            reliability_hysteresis: params.reliability_hysteresis,
            startup_consist_threshold: params.startup_consist_threshold,
            band_h: params.speed_validation_band_h,
            band_l: params.speed_validation_band_l,
            min_startup_valid_speed_dhz: params.min_startup_valid_speed_dhz,
            max_app_positive_mec_speed_dhz: params.max_app_positive_mec_speed_dhz,
            bemf_consistency_gain: params.bemf_consistency_gain,
            bemf_consistency_check: params.bemf_consistency_check,
            dual_check_enabled: true,
            is_speed_reliable: false,
            is_bemf_consistent: false,
            is_converged: false,
            force_converge: false,
            force_converge2: false,
            reliability_counter: 0,
            consistency_counter: 0,
            obs_bemf_level: 0,
            est_bemf_level: 0,
        }
    }

    /// Zero all dynamic state: integrators, speed FIFO, PLL integrator,
    /// flags and counters. Called by the supervisor on every motor
    /// (re)start; idempotent.
    pub fn clear(&mut self) {
        self.i_alpha_est = 0;
        self.i_beta_est = 0;
        self.bemf_alpha_est = 0;
        self.bemf_beta_est = 0;
        self.bemf_alpha = 0;
        self.bemf_beta = 0;
        self.base.clear();
        self.consistency_counter = 0;
        self.reliability_counter = 0;
        self.is_converged = false;
        self.is_bemf_consistent = false;
        self.is_speed_reliable = false;
        self.obs_bemf_level = 0;
        self.est_bemf_level = 0;
        self.dpp_buffer_sum = 0;
        self.force_converge = false;
        self.force_converge2 = false;
        self.speed_buffer = [0; SPEED_BUFFER_CAPACITY];
        self.speed_buffer_index = 0;
        self.speed_buffer_oldest = 0;
        self.pll.reset();
    }

    /// One observer tick: advance the Luenberger equations, run the PLL, push
    /// the new speed sample and accumulate the electrical angle. Returns the
    /// updated angle estimate.
    ///
    /// Deterministic and allocation-free; intended to be called from the
    /// current-loop ISR.
    pub fn step(&mut self, inputs: &ObserverInputs) -> i16 {
        let f1 = self.gains.f1 as i32;
        let f2 = self.gains.f2 as i32;

        // Clamp the integrators before anything consumes them. Round-off
        // would otherwise walk them into overflow within seconds.
        self.bemf_alpha_est = clamp_estimate(self.bemf_alpha_est, f2 * i16::MAX as i32);
        let bemf_alpha = (self.bemf_alpha_est >> self.gains.f2_log) as i16;

        self.bemf_beta_est = clamp_estimate(self.bemf_beta_est, f2 * i16::MAX as i32);
        let bemf_beta = (self.bemf_beta_est >> self.gains.f2_log) as i16;

        self.i_alpha_est = clamp_estimate(self.i_alpha_est, f1 * i16::MAX as i32);
        self.i_beta_est = clamp_estimate(self.i_beta_est, f1 * i16::MAX as i32);

        let i_alpha = (self.i_alpha_est >> self.gains.f1_log) as i16;
        let i_beta = (self.i_beta_est >> self.gains.f1_log) as i16;
        let i_alpha_err = i_alpha.wrapping_sub(inputs.i_alpha_beta.alpha);
        let i_beta_err = i_beta.wrapping_sub(inputs.i_alpha_beta.beta);

        // Reconstruct the applied phase voltages from the modulation
        // commands and the instantaneous bus voltage.
        let v_alpha = ((inputs.v_bus as i32 * inputs.v_alpha_beta.alpha as i32) >> 16) as i16;
        let v_beta = ((inputs.v_bus as i32 * inputs.v_alpha_beta.beta as i32) >> 16) as i16;

        let speed_dpp = self.base.el_speed_dpp as i32;

        // Alpha-axis dynamics.
        let mut i_alpha_next = self.i_alpha_est - self.gains.c1 as i32 * i_alpha as i32;
        i_alpha_next += self.gains.c2 as i32 * i_alpha_err as i32;
        i_alpha_next += self.gains.c5 as i32 * v_alpha as i32;
        i_alpha_next -= self.gains.c3 as i32 * bemf_alpha as i32;

        let mut bemf_alpha_next = self.bemf_alpha_est + self.gains.c4 as i32 * i_alpha_err as i32;
        let mut cross = (bemf_beta as i32) >> self.f3_pow2;
        cross *= self.c6 as i32;
        bemf_alpha_next += speed_dpp * cross;

        // Beta-axis dynamics; the cross-coupling term changes sign.
        let mut i_beta_next = self.i_beta_est - self.gains.c1 as i32 * i_beta as i32;
        i_beta_next += self.gains.c2 as i32 * i_beta_err as i32;
        i_beta_next += self.gains.c5 as i32 * v_beta as i32;
        i_beta_next -= self.gains.c3 as i32 * bemf_beta as i32;

        let mut bemf_beta_next = self.bemf_beta_est + self.gains.c4 as i32 * i_beta_err as i32;
        cross = (bemf_alpha as i32) >> self.f3_pow2;
        cross *= self.c6 as i32;
        bemf_beta_next -= speed_dpp * cross;

        // Track the PLL with the current rotation direction.
        let direction: i32 = if self.base.el_speed_dpp >= 0 { 1 } else { -1 };

        self.bemf_alpha = bemf_alpha;
        self.bemf_beta = bemf_beta;

        let rotor_speed = self.pll.step(
            (bemf_alpha as i32 * direction) as i16,
            (bemf_beta as i32 * direction) as i16,
            self.base.el_angle,
        );

        self.store_rotor_speed(rotor_speed);

        self.base.el_angle = self.base.el_angle.wrapping_add(rotor_speed);

        // Clamping here as well as on entry keeps every stored estimate
        // inside its declared range between ticks; the arithmetic is
        // unchanged since the entry clamp is idempotent.
        self.i_alpha_est = clamp_estimate(i_alpha_next, f1 * i16::MAX as i32);
        self.bemf_alpha_est = clamp_estimate(bemf_alpha_next, f2 * i16::MAX as i32);
        self.i_beta_est = clamp_estimate(i_beta_next, f1 * i16::MAX as i32);
        self.bemf_beta_est = clamp_estimate(bemf_beta_next, f2 * i16::MAX as i32);

        self.base.el_angle
    }

    fn store_rotor_speed(&mut self, rotor_speed: i16) {
        let mut index = self.speed_buffer_index + 1;
        if index == self.buffer_size_dhz {
            index = 0;
        }
        // Snapshot the displaced element; the rolling dpp sum needs it when
        // the two window sizes coincide.
        self.speed_buffer_oldest = self.speed_buffer[index as usize];
        self.speed_buffer[index as usize] = rotor_speed;
        self.speed_buffer_index = index;
    }

    /// Update the rolling average of the electrical speed over the most
    /// recent `Ndpp` samples and publish it for the next observer ticks.
    /// Call once per speed-loop period, after the high-rate step has pushed
    /// its sample.
    pub fn compute_avg_el_speed_dpp(&mut self) {
        let index_new = self.speed_buffer_index as i32;
        let size_dpp = self.buffer_size_dpp as i32;
        let size_dhz = self.buffer_size_dhz as i32;
        let size_diff = size_dhz - size_dpp;

        let mut sum = self.dpp_buffer_sum;
        if size_diff == 0 {
            sum += self.speed_buffer[index_new as usize] as i32 - self.speed_buffer_oldest as i32;
        } else {
            let mut index_old = index_new + size_diff;
            if index_old >= size_dhz {
                index_old -= size_dhz;
            }
            sum += self.speed_buffer[index_new as usize] as i32
                - self.speed_buffer[index_old as usize] as i32;
        }

        self.base.el_speed_dpp = (sum >> self.buffer_size_dpp_log) as i16;
        self.dpp_buffer_sum = sum;
    }

    /// Average mechanical speed over the whole FIFO, in tenths of Hz, plus
    /// the reliability verdict. Call once per speed-loop period.
    ///
    /// The verdict combines the speed-variance check, the back-EMF
    /// consistency check (when enabled) and the base range hysteresis; see
    /// the field docs on [`ObserverParams`] for the thresholds.
    pub fn compute_avg_mec_speed_dhz(&mut self) -> (i16, bool) {
        let size = self.buffer_size_dhz as usize;

        let mut avg_dpp: i32 = 0;
        for sample in &self.speed_buffer[..size] {
            avg_dpp += *sample as i32;
        }
        avg_dpp /= size as i32;

        let mut variance: i32 = 0;
        for sample in &self.speed_buffer[..size] {
            let deviation = *sample as i32 - avg_dpp;
            variance += deviation * deviation;
        }
        variance /= size as i32;

        // The acceptable variance scales with the square of the average.
        let avg_square = avg_dpp * avg_dpp;
        let variance_limit = (avg_square / 128) * self.variance_percentage as i32;
        self.is_speed_reliable = variance <= variance_limit;

        let mut aux = avg_dpp * self.base.measurement_frequency() as i32;
        aux *= 10;
        aux /= 65536;
        aux /= self.base.el_to_mec_ratio() as i32;
        let mec_speed_dhz = aux as i16;
        self.base.avg_mec_speed_dhz = mec_speed_dhz;

        // Back-EMF consistency: compare the observed back-EMF magnitude
        // against the level the current speed implies.
        let mut consistent = false;
        if self.dual_check_enabled {
            let mut obs_sq: i32 = 0;
            let mut est_sq: i32 = 0;

            let abs_dhz = (mec_speed_dhz as i32).abs();
            if abs_dhz < self.max_app_positive_mec_speed_dhz as i32 {
                obs_sq = self.bemf_alpha as i32 * self.bemf_alpha as i32;
                obs_sq += self.bemf_beta as i32 * self.bemf_beta as i32;

                let est = (abs_dhz * 32767) / self.base.max_reliable_mec_speed_dhz() as i32;
                est_sq = (est * self.bemf_consistency_gain as i32) / 64;
                est_sq *= est;

                let threshold = est_sq - (est_sq / 64) * self.bemf_consistency_check as i32;
                consistent = obs_sq > threshold;
            }

            self.is_bemf_consistent = consistent;
            self.obs_bemf_level = obs_sq;
            self.est_bemf_level = est_sq;
        } else {
            consistent = true;
        }

        let reliable = if !self.is_converged {
            self.base.is_mec_speed_reliable(mec_speed_dhz)
        } else if !self.is_speed_reliable || !consistent {
            self.reliability_counter = self.reliability_counter.saturating_add(1);
            if self.reliability_counter >= self.reliability_hysteresis {
                self.reliability_counter = 0;
                self.base.saturate_speed_error_counter();
                false
            } else {
                self.base.is_mec_speed_reliable(mec_speed_dhz)
            }
        } else {
            self.reliability_counter = 0;
            self.base.is_mec_speed_reliable(mec_speed_dhz)
        };

        (mec_speed_dhz, reliable)
    }

    /// Startup convergence detector, called during the open-loop ramp with
    /// the externally forced mechanical speed. Declares convergence after
    /// `startup_consist_threshold` consecutive calls in which the estimate
    /// matches the forced speed in sign, exceeds the minimum valid speed,
    /// sits inside the validation band and the variance check holds. Any
    /// miss resets the count. The converged state latches until `clear`.
    pub fn is_observer_converged(&mut self, forced_mec_speed_dhz: i16) -> bool {
        let forced = if self.force_converge2 {
            // Virtual-speed-sensor fallback: validate against our own
            // estimate instead of the forced ramp.
            self.base.avg_mec_speed_dhz
        } else {
            forced_mec_speed_dhz
        };

        if self.force_converge {
            self.declare_converged();
            return true;
        }

        let estimated = self.base.avg_mec_speed_dhz;
        let same_direction = estimated as i32 * forced as i32 > 0;

        let estimated_abs = (estimated as i32).abs();
        let forced_abs = (forced as i32).abs();
        let upper = (forced_abs * self.band_h as i32) / 16;
        let lower = (forced_abs * self.band_l as i32) / 16;

        let in_band = same_direction
            && self.is_speed_reliable
            && estimated_abs > self.min_startup_valid_speed_dhz as i32
            && estimated_abs >= lower
            && estimated_abs <= upper;

        if in_band {
            self.consistency_counter = self.consistency_counter.saturating_add(1);
            if self.consistency_counter >= self.startup_consist_threshold {
                self.declare_converged();
                return true;
            }
        } else {
            self.consistency_counter = 0;
        }

        false
    }

    fn declare_converged(&mut self) {
        #[cfg(feature = "defmt")]
        if !self.is_converged {
            defmt::debug!("state observer converged");
        }
        self.is_converged = true;
        self.base.speed_error_number = 0;
    }

    /// Last decimated back-EMF estimate, s16 per axis.
    pub fn estimated_bemf(&self) -> AlphaBeta {
        AlphaBeta {
            alpha: self.bemf_alpha,
            beta: self.bemf_beta,
        }
    }

    /// Estimated stator currents, decimated by F1.
    pub fn estimated_current(&self) -> AlphaBeta {
        AlphaBeta {
            alpha: (self.i_alpha_est >> self.gains.f1_log) as i16,
            beta: (self.i_beta_est >> self.gains.f1_log) as i16,
        }
    }

    /// The two observer gains adjustable at run time.
    pub fn observer_gains(&self) -> (i16, i16) {
        (self.gains.c2, self.gains.c4)
    }

    /// Replace the current-error injection gains C2 and C4. The pair is
    /// multi-word; the stores run inside a critical section so the step
    /// never sees a torn update.
    pub fn set_observer_gains(&mut self, c2: i16, c4: i16) {
        critical_section::with(|_| {
            self.gains.c2 = c2;
            self.gains.c4 = c4;
        });
    }

    pub fn pll_gains(&self) -> (i16, i16) {
        self.pll.gains()
    }

    pub fn set_pll_gains(&mut self, kp: i16, ki: i16) {
        self.pll.set_gains(kp, ki);
    }

    /// Discharge the PLL integrator.
    pub fn pll_reset(&mut self) {
        self.pll.reset();
    }

    /// Lock the PLL onto a known speed and angle, e.g. when handing over
    /// from the open-loop ramp.
    pub fn pll_set(&mut self, speed_dpp: i16, el_angle: i16) {
        self.pll.preload(speed_dpp);
        self.base.el_angle = el_angle;
    }

    /// Enable or disable the back-EMF consistency half of the reliability
    /// decision.
    pub fn bemf_consistency_switch(&mut self, enable: bool) {
        self.dual_check_enabled = enable;
    }

    /// Result of the last back-EMF consistency check.
    pub fn is_bemf_consistent(&self) -> bool {
        self.is_bemf_consistent
    }

    /// Result of the last speed-variance check.
    pub fn is_variance_tight(&self) -> bool {
        self.is_speed_reliable
    }

    /// Observed back-EMF squared level from the last consistency check.
    pub fn observed_bemf_level(&self) -> i32 {
        self.obs_bemf_level
    }

    /// Speed-implied back-EMF squared level from the last consistency check.
    pub fn estimated_bemf_level(&self) -> i32 {
        self.est_bemf_level
    }

    /// Declare convergence unconditionally on the next detector call.
    pub fn force_convergency1(&mut self) {
        self.force_converge = true;
    }

    /// Validate convergence against the observer's own speed estimate
    /// instead of the forced ramp speed.
    pub fn force_convergency2(&mut self) {
        self.force_converge2 = true;
    }

    pub fn set_min_startup_valid_speed_dhz(&mut self, speed_dhz: u16) {
        self.min_startup_valid_speed_dhz = speed_dhz;
    }
}

// Saturate an integrator at +bound / -bound. The lower comparison is
// inclusive, mirroring the update equations which may land exactly on the
// negative bound.
fn clamp_estimate(value: i32, bound: i32) -> i32 {
    if value > bound {
        bound
    } else if value <= -bound {
        -bound
    } else {
        value
    }
}

impl SpeedSensor for StateObserver {
    fn el_angle(&self) -> i16 {
        self.base.el_angle
    }

    fn el_speed_dpp(&self) -> i16 {
        self.base.el_speed_dpp
    }

    fn avg_mec_speed_dhz(&self) -> i16 {
        self.base.avg_mec_speed_dhz
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ObserverParams {
        ObserverParams {
            gains: ObserverGains {
                c1: 328,
                c2: -4587,
                c3: 800,
                c4: 20000,
                c5: 1000,
                f1: 16384,
                f2: 16384,
                f1_log: 14,
                f2_log: 14,
            },
            pll: PiParams {
                kp: 2500,
                ki: 600,
                kp_div_pow2: 14,
                ki_div_pow2: 16,
                ..Default::default()
            },
            base: SpeedPositionParams {
                max_reliable_mec_speed_dhz: 6400,
                min_reliable_mec_speed_dhz: 0,
                max_speed_errors: 3,
                measurement_frequency: 16384,
                el_to_mec_ratio: 1,
            },
            speed_buffer_size_dhz: 64,
            speed_buffer_size_dpp: 16,
            speed_buffer_size_dpp_log: 4,
            variance_percentage: 62,
            reliability_hysteresis: 8,
            startup_consist_threshold: 64,
            speed_validation_band_h: 18,
            speed_validation_band_l: 14,
            min_startup_valid_speed_dhz: 50,
            max_app_positive_mec_speed_dhz: 3000,
            bemf_consistency_gain: 64,
            bemf_consistency_check: 32,
        }
    }

    #[test]
    fn init_derives_f3_and_c6() {
        let obs = StateObserver::new(params());
        // C6_COMP_CONST1 / 16384 = 63, six halvings to zero.
        assert_eq!(obs.f3_pow2, 6);
        assert_eq!(obs.c6, (16384i32 * 64 / C6_COMP_CONST2) as i16);
    }

    #[test]
    fn zero_inputs_are_a_fixed_point() {
        let mut obs = StateObserver::new(params());
        let inputs = ObserverInputs::default();
        for _ in 0..100 {
            assert_eq!(obs.step(&inputs), 0);
            obs.compute_avg_el_speed_dpp();
        }
        assert_eq!(obs.estimated_current(), AlphaBeta::default());
        assert_eq!(obs.estimated_bemf(), AlphaBeta::default());
        assert_eq!(obs.el_speed_dpp(), 0);
    }

    #[test]
    fn clear_is_idempotent() {
        let mut obs = StateObserver::new(params());
        obs.pll_set(700, 1234);
        for _ in 0..10 {
            obs.step(&ObserverInputs {
                i_alpha_beta: AlphaBeta {
                    alpha: 1000,
                    beta: -2000,
                },
                v_alpha_beta: AlphaBeta {
                    alpha: 3000,
                    beta: 500,
                },
                v_bus: 20000,
            });
            obs.compute_avg_el_speed_dpp();
        }
        obs.clear();
        let snapshot = (
            obs.el_angle(),
            obs.el_speed_dpp(),
            obs.estimated_current(),
            obs.estimated_bemf(),
            obs.observed_bemf_level(),
        );
        obs.clear();
        assert_eq!(
            snapshot,
            (
                obs.el_angle(),
                obs.el_speed_dpp(),
                obs.estimated_current(),
                obs.estimated_bemf(),
                obs.observed_bemf_level(),
            )
        );
        assert_eq!(obs.el_angle(), 0);
        assert_eq!(obs.estimated_current(), AlphaBeta::default());
    }

    #[test]
    fn observer_gain_setter_writes_c2_and_c4() {
        let mut obs = StateObserver::new(params());
        obs.set_observer_gains(-1111, 2222);
        assert_eq!(obs.observer_gains(), (-1111, 2222));
        // The other gains are untouched.
        assert_eq!(obs.gains.c1, 328);
        assert_eq!(obs.gains.c3, 800);
        assert_eq!(obs.gains.c5, 1000);
    }

    #[test]
    fn pll_set_takes_effect_immediately() {
        let mut obs = StateObserver::new(params());
        obs.pll_set(900, -5000);
        assert_eq!(obs.el_angle(), -5000);
        // With zero back-EMF the next step outputs the preloaded speed.
        let angle = obs.step(&ObserverInputs::default());
        assert_eq!(angle, -5000 + 900);
    }

    #[test]
    fn rolling_sum_matches_window() {
        let mut obs = StateObserver::new(params());
        // Drive the PLL integrator so steps push a known ramp of speeds.
        let mut pushed = Vec::new();
        for k in 0..200i32 {
            let speed = (k % 23 - 11) * 100;
            obs.pll_set(speed as i16, obs.el_angle());
            obs.step(&ObserverInputs::default());
            obs.compute_avg_el_speed_dpp();
            pushed.push(speed);

            if pushed.len() >= 16 {
                let window: i32 = pushed[pushed.len() - 16..].iter().sum();
                assert_eq!(obs.el_speed_dpp() as i32, window >> 4);
            }
        }
    }

    #[test]
    fn bemf_consistency_switch_disables_check() {
        let mut obs = StateObserver::new(params());
        obs.bemf_consistency_switch(false);
        let (_, reliable) = obs.compute_avg_mec_speed_dhz();
        // Zero speed with min_reliable = 0 passes the base range check.
        assert!(reliable);
        assert!(!obs.is_bemf_consistent());
    }
}
