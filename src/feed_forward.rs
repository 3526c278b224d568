//! Feed-forward voltage generator: pre-biases the q/d current PI controllers
//! from the reference currents, the measured speed and the bus voltage, so
//! the PI only has to correct the residual.
//!
//! Three ordered phases per speed-loop tick: `compute` builds the new
//! feed-forward terms, `condition` adds them to the PI output on the way to
//! the inverse Park transform, `data_process` low-pass filters the PI output
//! for the next `compute`.

use crate::math::saturate_s16;
use crate::pid::PiController;
use crate::speed_pos::SpeedSensor;
use crate::Qd;

/// Bus-voltage sensing seam. One handle per feed-forward instance, passed at
/// construction; the sensor outlives the feed-forward stage.
pub trait BusVoltageSensor {
    /// Average bus voltage in the digital normalization shared with the
    /// modulation commands.
    fn avg_bus_voltage_d(&self) -> u16;
}

/// The three feed-forward tuning constants. Read and written as one unit so
/// a tuning session never observes a partial update.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FfConstants {
    /// d-axis inductance constant, applied to the q-axis cross term.
    pub k1d: i32,
    /// q-axis inductance constant, applied to the d-axis cross term.
    pub k1q: i32,
    /// Back-EMF constant, q axis.
    pub k2: i32,
}

/// Static configuration of the feed-forward stage.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FfParams {
    /// Default tuning constants, restored at construction.
    pub constants: FfConstants,
    /// Single-pole low-pass bandwidth of the averaged PI output, as a
    /// power-of-two shift count.
    pub lpf_bw_pow2: u8,
}

/// Feed-forward state for one motor.
pub struct FeedForward<'a, B: BusVoltageSensor> {
    bus_sensor: &'a B,
    constants: FfConstants,
    def_constants: FfConstants,
    lpf_bw_pow2: u8,
    vqd_ff: Qd,
    vqd_pi_out: Qd,
    vqd_av_pi_out: Qd,
}

impl<'a, B: BusVoltageSensor> FeedForward<'a, B> {
    pub fn new(bus_sensor: &'a B, params: FfParams) -> Self {
        Self {
            bus_sensor,
            constants: params.constants,
            def_constants: params.constants,
            lpf_bw_pow2: params.lpf_bw_pow2,
            vqd_ff: Qd::default(),
            vqd_pi_out: Qd::default(),
            vqd_av_pi_out: Qd::default(),
        }
    }

    /// Drop the feed-forward contribution. Called before each motor restart.
    pub fn clear(&mut self) {
        self.vqd_ff = Qd::default();
    }

    /// Prepare for closed-loop current control: zero the averaged PI output
    /// and both current-regulator integrators.
    pub fn init_foc_additional(&mut self, pid_q: &mut PiController, pid_d: &mut PiController) {
        self.vqd_av_pi_out = Qd::default();
        pid_q.set_integral_term(0);
        pid_d.set_integral_term(0);
    }

    /// Phase 1: compute the feed-forward voltage pair from the current
    /// references and the measured electrical speed.
    ///
    /// The q axis carries the `speed * Id` cross term (scaled by `k1d`) plus
    /// the back-EMF term `k2 * speed`; the d axis subtracts the
    /// `speed * Iq` cross term scaled by `k1q`. Everything is normalized by
    /// half the average bus voltage.
    pub fn compute(&mut self, iqd_ref: Qd, speed: &impl SpeedSensor) {
        let speed_dpp = speed.el_speed_dpp() as i32;
        let v_bus_half = (self.bus_sensor.avg_bus_voltage_d() / 2) as i32;
        debug_assert!(v_bus_half > 0);

        let t1 = (speed_dpp * iqd_ref.d as i32) / 32768;
        let mut t2 = (t1 * self.constants.k1d) / v_bus_half;
        t2 *= 2;
        let t3 = ((self.constants.k2 * speed_dpp) / v_bus_half) * 16;
        self.vqd_ff.q = saturate_s16(t3 + t2 + self.vqd_av_pi_out.q as i32);

        let t1 = (speed_dpp * iqd_ref.q as i32) / 32768;
        let mut t2 = (t1 * self.constants.k1q) / v_bus_half;
        t2 *= 2;
        self.vqd_ff.d = saturate_s16(self.vqd_av_pi_out.d as i32 - t2);
    }

    /// Phase 2: snapshot the PI output and return it with the feed-forward
    /// contribution added, each component saturated. The result goes to the
    /// inverse Park transform.
    pub fn condition(&mut self, vqd: Qd) -> Qd {
        self.vqd_pi_out = vqd;

        Qd {
            q: saturate_s16(vqd.q as i32 + self.vqd_ff.q as i32),
            d: saturate_s16(vqd.d as i32 + self.vqd_ff.d as i32),
        }
    }

    /// Phase 3: single-pole low-pass of the snapshotted PI output into the
    /// average consumed by the next `compute`.
    pub fn data_process(&mut self) {
        let n = self.lpf_bw_pow2;

        let mut aux = (self.vqd_av_pi_out.q as i32) << n;
        aux = aux - self.vqd_av_pi_out.q as i32 + self.vqd_pi_out.q as i32;
        self.vqd_av_pi_out.q = (aux >> n) as i16;

        let mut aux = (self.vqd_av_pi_out.d as i32) << n;
        aux = aux - self.vqd_av_pi_out.d as i32 + self.vqd_pi_out.d as i32;
        self.vqd_av_pi_out.d = (aux >> n) as i16;
    }

    /// Current feed-forward voltage pair.
    pub fn vqd_ff(&self) -> Qd {
        self.vqd_ff
    }

    /// Low-pass filtered output of the q/d current PI regulators.
    pub fn vqd_av_pi_out(&self) -> Qd {
        self.vqd_av_pi_out
    }

    /// Coherent read of the tuning triple.
    pub fn constants(&self) -> FfConstants {
        critical_section::with(|_| self.constants)
    }

    /// Coherent replace of the tuning triple; a step preempting the setter
    /// sees either all three old or all three new values.
    pub fn set_constants(&mut self, constants: FfConstants) {
        critical_section::with(|_| {
            self.constants = constants;
        });
    }

    /// Default constants the instance was built with.
    pub fn default_constants(&self) -> FfConstants {
        self.def_constants
    }
}
