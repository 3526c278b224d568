//! Base speed & position feedback record, owned in place by any speed/angle
//! estimator, plus the generic speed-error hysteresis the supervisor relies
//! on when an estimator has no better reliability information of its own.

/// Static configuration of the base record.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SpeedPositionParams {
    /// Highest mechanical speed (tenths of Hz, absolute) considered a sane
    /// reading.
    pub max_reliable_mec_speed_dhz: u16,
    /// Lowest mechanical speed (tenths of Hz, absolute) considered a sane
    /// reading.
    pub min_reliable_mec_speed_dhz: u16,
    /// Out-of-range readings tolerated before the sensor is declared
    /// unreliable.
    pub max_speed_errors: u8,
    /// Rate at which the estimator step runs, in Hz. Converts dpp to dhz.
    pub measurement_frequency: u16,
    /// Electrical-to-mechanical ratio (pole pairs).
    pub el_to_mec_ratio: u8,
}

/// Rotor angle and speed as published by an estimator, with the shared
/// reliability bookkeeping.
pub struct SpeedPosition {
    pub(crate) el_angle: i16,
    pub(crate) el_speed_dpp: i16,
    pub(crate) avg_mec_speed_dhz: i16,
    pub(crate) speed_error_number: u8,
    max_speed_errors: u8,
    max_reliable_mec_speed_dhz: u16,
    min_reliable_mec_speed_dhz: u16,
    measurement_frequency: u16,
    el_to_mec_ratio: u8,
}

impl SpeedPosition {
    pub fn new(params: SpeedPositionParams) -> Self {
        Self {
            el_angle: 0,
            el_speed_dpp: 0,
            avg_mec_speed_dhz: 0,
            speed_error_number: 0,
            max_speed_errors: params.max_speed_errors,
            max_reliable_mec_speed_dhz: params.max_reliable_mec_speed_dhz,
            min_reliable_mec_speed_dhz: params.min_reliable_mec_speed_dhz,
            measurement_frequency: params.measurement_frequency,
            el_to_mec_ratio: params.el_to_mec_ratio,
        }
    }

    /// Zero the dynamic state. Called on every motor (re)start.
    pub fn clear(&mut self) {
        self.el_angle = 0;
        self.el_speed_dpp = 0;
        self.avg_mec_speed_dhz = 0;
        self.speed_error_number = 0;
    }

    /// Range hysteresis on a mechanical speed reading. Out-of-range readings
    /// bump the error counter up to its maximum; in-range readings reset it
    /// unless it already saturated, so a fully tripped counter stays tripped
    /// until `clear`. Reports reliable while the counter is below the
    /// maximum.
    pub fn is_mec_speed_reliable(&mut self, mec_speed_dhz: i16) -> bool {
        let abs_speed = (mec_speed_dhz as i32).unsigned_abs();

        let out_of_range = abs_speed > self.max_reliable_mec_speed_dhz as u32
            || abs_speed < self.min_reliable_mec_speed_dhz as u32;

        if out_of_range {
            if self.speed_error_number < self.max_speed_errors {
                self.speed_error_number += 1;
            }
        } else if self.speed_error_number < self.max_speed_errors {
            self.speed_error_number = 0;
        }

        self.speed_error_number != self.max_speed_errors
    }

    // Saturate the error counter, latching the unreliable verdict until
    // `clear`.
    pub(crate) fn saturate_speed_error_counter(&mut self) {
        self.speed_error_number = self.max_speed_errors;
    }

    pub fn measurement_frequency(&self) -> u16 {
        self.measurement_frequency
    }

    pub fn el_to_mec_ratio(&self) -> u8 {
        self.el_to_mec_ratio
    }

    pub fn max_reliable_mec_speed_dhz(&self) -> u16 {
        self.max_reliable_mec_speed_dhz
    }
}

/// The seam through which downstream consumers (the feed-forward stage, the
/// speed & torque controller) read an estimator's outputs.
pub trait SpeedSensor {
    /// Rotor electrical angle, s16 degrees.
    fn el_angle(&self) -> i16;
    /// Average electrical speed as the per-tick angle increment.
    fn el_speed_dpp(&self) -> i16;
    /// Average mechanical speed in tenths of Hz.
    fn avg_mec_speed_dhz(&self) -> i16;
}
