pub const EPSILON1: f64 = 0.1;
pub const EPSILON2: f64 = 0.01;
pub const EPSILON3: f64 = 0.001;
pub const EPSILON4: f64 = 0.0001;
pub const EPSILON5: f64 = 0.00001;
pub const EPSILON6: f64 = 0.000001;
pub const EPSILON7: f64 = 0.0000001;
pub const EPSILON8: f64 = 0.00000001;
pub const EPSILON9: f64 = 0.000000001;
pub const EPSILON10: f64 = 0.0000000001;
pub const EPSILON11: f64 = 0.00000000001;
pub const EPSILON12: f64 = 0.000000000001;
pub const EPSILON13: f64 = 0.0000000000001;
pub const EPSILON14: f64 = 0.00000000000001;
pub const EPSILON15: f64 = 0.000000000000001;
pub const EPSILON16: f64 = 0.0000000000000001;
pub const EPSILON17: f64 = 0.00000000000000001;
pub const EPSILON18: f64 = 0.000000000000000001;
pub const EPSILON19: f64 = 0.0000000000000000001;
pub const EPSILON20: f64 = 0.00000000000000000001;

pub fn equals_epsilon(
    left: f64,
    right: f64,
    relative_epsilon: Option<f64>,
    absolute_epsilon: Option<f64>,
) -> bool {
    let relative_epsilon = relative_epsilon.unwrap_or(0.0);
    let absolute_epsilon = absolute_epsilon.unwrap_or(relative_epsilon);
    let diff = (left - right).abs();
    diff <= absolute_epsilon || diff <= relative_epsilon * left.abs()
}
