//! Step library
//!
//! Every step records its outcome in the registry and returns; transport
//! failures become FAIL on the checks the step owns and never stop the
//! session.
//!
//! | Step          | Transport            | Checks                                   |
//! |---------------|----------------------|------------------------------------------|
//! | PWM outputs   | telemetry link       | MAIN OUT 1-4, MAIN OUT 5-8, AUX OUT 1-6  |
//! | Radio         | companion stream     | PPM and SBUSo                            |
//! | Serial lines  | shell + link detect  | Serial 1..5                              |
//! | CAN buses     | shell + candump      | CAN 1, CAN 2                             |
//! | Power sense   | companion stream     | Psense Voltage/Current, PSENSE Overall   |
//! | ADC           | companion stream     | ADC                                      |
//! | I2C           | companion stream     | I2C1, I2C2                               |

pub mod can;
pub mod capture;
pub mod pwm;
pub mod serial;

pub use can::run_can_bus;
pub use capture::{run_capture, CaptureStep, MESSAGES_MISSING};
pub use pwm::{run_pwm_outputs, OutputGroup, OUTPUT_GROUPS};
pub use serial::run_serial_line;
