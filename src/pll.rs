//! Software PLL extracting rotor speed from the estimated back-EMF: a
//! quadrature detector on the (alpha, beta) back-EMF followed by a PI
//! regulator whose output is the per-tick angle increment (dpp).

use crate::math;
use crate::pid::{PiController, PiParams};

pub struct SpeedPll {
    pi: PiController,
}

impl SpeedPll {
    pub fn new(params: PiParams) -> Self {
        Self {
            pi: PiController::new(params),
        }
    }

    /// One PLL step. Inputs are the estimated back-EMF components, already
    /// sign-corrected for the rotation direction, and the current angle
    /// estimate. The detector projects the back-EMF onto the quadrature
    /// axis:
    ///
    /// `err = (bemf_beta * cos(angle)) >> 15 - (bemf_alpha * sin(angle)) >> 15`
    ///
    /// which is proportional to the sine of the angle error for a back-EMF
    /// rotating as `(cos, sin)`. Returns the new speed in dpp.
    pub fn step(&mut self, bemf_alpha: i16, bemf_beta: i16, el_angle: i16) -> i16 {
        let (sin, cos) = math::sin_cos(el_angle);

        let beta_cos = (bemf_beta as i32 * cos as i32) >> 15;
        let alpha_sin = (bemf_alpha as i32 * sin as i32) >> 15;

        self.pi.process(beta_cos - alpha_sin)
    }

    /// Discharge the integrator.
    pub fn reset(&mut self) {
        self.pi.set_integral_term(0);
    }

    /// Preload the integrator so the next zero-error step outputs
    /// `speed_dpp`. Used when handing over from open-loop startup.
    pub fn preload(&mut self, speed_dpp: i16) {
        self.pi
            .set_integral_term(speed_dpp as i32 * self.pi.ki_divisor());
    }

    pub fn gains(&self) -> (i16, i16) {
        (self.pi.kp(), self.pi.ki())
    }

    /// Replace both gains. The pair is multi-word; the stores run inside a
    /// critical section so a step preempting the setter sees a coherent
    /// pair.
    pub fn set_gains(&mut self, kp: i16, ki: i16) {
        critical_section::with(|_| {
            self.pi.set_kp(kp);
            self.pi.set_ki(ki);
        });
    }
}
