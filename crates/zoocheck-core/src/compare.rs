//! Tolerance-aware comparison of produced values against expected fixtures.

use half::{bf16, f16};
use ndarray::ArrayD;
use zoocheck_inference::{ElementKind, SlotKind, TensorData, Value};

use crate::config::ToleranceConfig;
use crate::error::{CheckError, Mismatch, Result};

/// How two elements of one kind are compared.
///
/// Chosen from the element kind alone, never from the data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tolerance {
    /// Bit-for-bit or codepoint-for-codepoint equality.
    Exact,
    /// `|a-b| <= atol` or `|a-b| <= rtol * max(|a|, |b|)`.
    Float { atol: f64, rtol: f64 },
    /// Distance between ordered bit patterns of a 16-bit float encoding.
    Ulps(u32),
}

impl ToleranceConfig {
    /// Tolerance rule for an element kind.
    pub fn for_kind(&self, kind: ElementKind) -> Tolerance {
        match kind {
            ElementKind::Float32 => Tolerance::Float {
                atol: self.f32_atol,
                rtol: self.f32_rtol,
            },
            ElementKind::Float64 => Tolerance::Float {
                atol: self.f64_atol,
                rtol: self.f64_rtol,
            },
            ElementKind::Float16 | ElementKind::BFloat16 => {
                Tolerance::Ulps(self.reduced_precision_ulps)
            }
            _ => Tolerance::Exact,
        }
    }
}

/// Whether `a` and `b` agree under an absolute-or-relative tolerance.
///
/// NaN matches NaN; infinities only match themselves.
pub fn floats_close(a: f64, b: f64, atol: f64, rtol: f64) -> bool {
    if a == b || (a.is_nan() && b.is_nan()) {
        return true;
    }
    if !a.is_finite() || !b.is_finite() {
        return false;
    }
    let diff = (a - b).abs();
    diff <= atol || diff <= rtol * a.abs().max(b.abs())
}

/// Map a sign-magnitude 16-bit float pattern onto a monotonic integer line.
///
/// Both zeros map to 0.
fn ordered_bits(bits: u16) -> i32 {
    let magnitude = i32::from(bits & 0x7fff);
    if bits & 0x8000 != 0 { -magnitude } else { magnitude }
}

/// Exponent field of float16 and bfloat16.
const F16_EXPONENT: u16 = 0x7c00;
const BF16_EXPONENT: u16 = 0x7f80;

/// NaN matches NaN; infinities only match themselves.
fn within_ulps(a_bits: u16, b_bits: u16, exponent: u16, ulps: u32) -> bool {
    if a_bits == b_bits {
        return true;
    }
    let special = |bits: u16| bits & exponent == exponent;
    let nan = |bits: u16| special(bits) && bits & !exponent & 0x7fff != 0;
    if nan(a_bits) || nan(b_bits) {
        return nan(a_bits) && nan(b_bits);
    }
    if special(a_bits) || special(b_bits) {
        return false;
    }
    ordered_bits(a_bits).abs_diff(ordered_bits(b_bits)) <= ulps
}

/// Compare two float16 values within `ulps` units in the last place.
pub fn f16_within_ulps(a: f16, b: f16, ulps: u32) -> bool {
    within_ulps(a.to_bits(), b.to_bits(), F16_EXPONENT, ulps)
}

/// Compare two bfloat16 values within `ulps` units in the last place.
pub fn bf16_within_ulps(a: bf16, b: bf16, ulps: u32) -> bool {
    within_ulps(a.to_bits(), b.to_bits(), BF16_EXPONENT, ulps)
}

fn first_difference<T, F>(actual: &ArrayD<T>, expected: &ArrayD<T>, equal: F) -> Option<usize>
where
    F: Fn(&T, &T) -> bool,
{
    actual
        .iter()
        .zip(expected.iter())
        .position(|(a, e)| !equal(a, e))
}

/// Compares produced values with expected ones.
#[derive(Debug, Clone, Default)]
pub struct Comparator {
    tolerance: ToleranceConfig,
}

impl Comparator {
    /// Create a comparator with the given tolerances.
    pub fn new(tolerance: ToleranceConfig) -> Self {
        Self { tolerance }
    }

    /// Compare `actual` with `expected` following the declared slot kind.
    ///
    /// `path` names the value in reports, e.g. the output slot name.
    pub fn compare(
        &self,
        path: &str,
        declared: &SlotKind,
        actual: &Value,
        expected: &Value,
    ) -> Result<()> {
        match declared {
            SlotKind::Optional(inner) => {
                match (present(actual), present(expected)) {
                    (None, None) => Ok(()),
                    (Some(a), Some(e)) => self.compare(path, inner, a, e),
                    (a, e) => Err(category_mismatch(
                        path,
                        if a.is_some() { "present" } else { "absent" },
                        if e.is_some() { "present" } else { "absent" },
                    )),
                }
            }
            SlotKind::Sequence(inner) => {
                let (a, e) = match (actual, expected) {
                    (Value::Sequence(a), Value::Sequence(e)) => (a, e),
                    _ => {
                        return Err(category_mismatch(path, actual.category(), expected.category()));
                    }
                };
                self.compare_sequences(path, a, e, |p, a, e| self.compare(p, inner, a, e))
            }
            SlotKind::Tensor { elem, .. } => {
                let (a, e) = match (actual, expected) {
                    (Value::Tensor(a), Value::Tensor(e)) => (a, e),
                    _ => {
                        return Err(category_mismatch(path, actual.category(), expected.category()));
                    }
                };
                if e.kind() != *elem {
                    return Err(CheckError::ValueMismatch {
                        path: path.to_string(),
                        detail: Mismatch::Kind {
                            actual: e.kind(),
                            expected: *elem,
                        },
                    });
                }
                self.compare_tensors(path, a, e)
            }
            SlotKind::Map => Err(CheckError::UnsupportedValueKind {
                path: path.to_string(),
                kind: "map".to_string(),
            }),
            SlotKind::Unsupported(name) => Err(CheckError::UnsupportedValueKind {
                path: path.to_string(),
                kind: name.clone(),
            }),
        }
    }

    /// Compare two values whose structure is taken from the values themselves.
    pub fn compare_values(&self, path: &str, actual: &Value, expected: &Value) -> Result<()> {
        match (actual, expected) {
            (Value::Tensor(a), Value::Tensor(e)) => self.compare_tensors(path, a, e),
            (Value::Sequence(a), Value::Sequence(e)) => {
                self.compare_sequences(path, a, e, |p, a, e| self.compare_values(p, a, e))
            }
            (Value::Optional(_), _) | (_, Value::Optional(_)) => {
                match (present(actual), present(expected)) {
                    (None, None) => Ok(()),
                    (Some(a), Some(e)) => self.compare_values(path, a, e),
                    (a, e) => Err(category_mismatch(
                        path,
                        if a.is_some() { "present" } else { "absent" },
                        if e.is_some() { "present" } else { "absent" },
                    )),
                }
            }
            _ => Err(category_mismatch(path, actual.category(), expected.category())),
        }
    }

    fn compare_sequences<F>(
        &self,
        path: &str,
        actual: &[Value],
        expected: &[Value],
        item: F,
    ) -> Result<()>
    where
        F: Fn(&str, &Value, &Value) -> Result<()>,
    {
        if actual.len() != expected.len() {
            return Err(CheckError::ValueMismatch {
                path: path.to_string(),
                detail: Mismatch::Length {
                    actual: actual.len(),
                    expected: expected.len(),
                },
            });
        }
        for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
            item(&format!("{}[{}]", path, i), a, e)?;
        }
        Ok(())
    }

    /// Compare two dense tensors: kind, then shape, then elements.
    pub fn compare_tensors(
        &self,
        path: &str,
        actual: &TensorData,
        expected: &TensorData,
    ) -> Result<()> {
        if actual.kind() != expected.kind() {
            return Err(CheckError::ValueMismatch {
                path: path.to_string(),
                detail: Mismatch::Kind {
                    actual: actual.kind(),
                    expected: expected.kind(),
                },
            });
        }

        if actual.shape() != expected.shape() {
            return Err(CheckError::ShapeMismatch {
                path: path.to_string(),
                actual: actual.shape().to_vec(),
                expected: expected.shape().to_vec(),
            });
        }

        let kind = expected.kind();
        let difference = match (self.tolerance.for_kind(kind), actual, expected) {
            (Tolerance::Float { atol, rtol }, TensorData::Float32(a), TensorData::Float32(e)) => {
                first_difference(a, e, |x, y| {
                    floats_close(f64::from(*x), f64::from(*y), atol, rtol)
                })
            }
            (Tolerance::Float { atol, rtol }, TensorData::Float64(a), TensorData::Float64(e)) => {
                first_difference(a, e, |x, y| floats_close(*x, *y, atol, rtol))
            }
            (Tolerance::Ulps(ulps), TensorData::Float16(a), TensorData::Float16(e)) => {
                first_difference(a, e, |x, y| f16_within_ulps(*x, *y, ulps))
            }
            (Tolerance::Ulps(ulps), TensorData::BFloat16(a), TensorData::BFloat16(e)) => {
                first_difference(a, e, |x, y| bf16_within_ulps(*x, *y, ulps))
            }
            (Tolerance::Exact, a, e) => exact_difference(a, e),
            (rule, _, _) => {
                return Err(CheckError::UnsupportedValueKind {
                    path: path.to_string(),
                    kind: format!("{} under {:?}", kind, rule),
                });
            }
        };

        match difference {
            None => Ok(()),
            Some(index) => Err(CheckError::ValueMismatch {
                path: path.to_string(),
                detail: Mismatch::Element {
                    kind,
                    index,
                    actual: actual.element_to_string(index).unwrap_or_default(),
                    expected: expected.element_to_string(index).unwrap_or_default(),
                },
            }),
        }
    }
}

fn eq<T: PartialEq>(a: &T, b: &T) -> bool {
    a == b
}

fn exact_difference(actual: &TensorData, expected: &TensorData) -> Option<usize> {
    match (actual, expected) {
        (TensorData::Float32(a), TensorData::Float32(e)) => {
            first_difference(a, e, |x, y| x.to_bits() == y.to_bits())
        }
        (TensorData::Float64(a), TensorData::Float64(e)) => {
            first_difference(a, e, |x, y| x.to_bits() == y.to_bits())
        }
        (TensorData::Float16(a), TensorData::Float16(e)) => {
            first_difference(a, e, |x, y| x.to_bits() == y.to_bits())
        }
        (TensorData::BFloat16(a), TensorData::BFloat16(e)) => {
            first_difference(a, e, |x, y| x.to_bits() == y.to_bits())
        }
        (TensorData::Int8(a), TensorData::Int8(e)) => first_difference(a, e, eq),
        (TensorData::Int16(a), TensorData::Int16(e)) => first_difference(a, e, eq),
        (TensorData::Int32(a), TensorData::Int32(e)) => first_difference(a, e, eq),
        (TensorData::Int64(a), TensorData::Int64(e)) => first_difference(a, e, eq),
        (TensorData::Uint8(a), TensorData::Uint8(e)) => first_difference(a, e, eq),
        (TensorData::Uint16(a), TensorData::Uint16(e)) => first_difference(a, e, eq),
        (TensorData::Uint32(a), TensorData::Uint32(e)) => first_difference(a, e, eq),
        (TensorData::Uint64(a), TensorData::Uint64(e)) => first_difference(a, e, eq),
        (TensorData::Bool(a), TensorData::Bool(e)) => first_difference(a, e, eq),
        (TensorData::String(a), TensorData::String(e)) => first_difference(a, e, eq),
        // Kinds are checked equal before this is reached.
        _ => Some(0),
    }
}

/// Contents of a possibly-optional value; non-optional values count as present.
fn present(value: &Value) -> Option<&Value> {
    match value {
        Value::Optional(inner) => inner.as_deref(),
        other => Some(other),
    }
}

fn category_mismatch(path: &str, actual: &'static str, expected: &'static str) -> CheckError {
    CheckError::ValueMismatch {
        path: path.to_string(),
        detail: Mismatch::Category { actual, expected },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use zoocheck_inference::Dim;

    fn tensor<T: zoocheck_inference::Element>(shape: &[usize], data: Vec<T>) -> Value {
        Value::Tensor(TensorData::from_shape_vec(shape.to_vec(), data).unwrap())
    }

    fn tensor_kind(elem: ElementKind) -> SlotKind {
        SlotKind::Tensor {
            elem,
            shape: vec![Dim::Unknown],
        }
    }

    #[test]
    fn test_reflexive_for_every_kind() {
        let c = Comparator::default();
        let values = vec![
            tensor(&[3], vec![1.5f32, f32::NAN, -0.0]),
            tensor(&[2], vec![1e300f64, f64::INFINITY]),
            tensor(&[2], vec![f16::from_f32(0.5), f16::NAN]),
            tensor(&[2], vec![bf16::from_f32(-3.0), bf16::INFINITY]),
            tensor(&[2], vec![i8::MIN, i8::MAX]),
            tensor(&[1], vec![i16::MIN]),
            tensor(&[1], vec![i32::MIN]),
            tensor(&[1], vec![i64::MAX]),
            tensor(&[1], vec![u8::MAX]),
            tensor(&[1], vec![u16::MAX]),
            tensor(&[1], vec![u32::MAX]),
            tensor(&[1], vec![u64::MAX]),
            tensor(&[2], vec![true, false]),
            tensor(&[2], vec!["héllo".to_string(), String::new()]),
        ];
        for v in &values {
            let kind = tensor_kind(v.as_tensor().unwrap().kind());
            c.compare("out", &kind, v, &v.clone()).unwrap();
            c.compare_values("out", v, &v.clone()).unwrap();
        }
    }

    #[test]
    fn test_shape_strict() {
        let c = Comparator::default();
        let a = tensor(&[2, 3], vec![1i32, 2, 3, 4, 5, 6]);
        let e = tensor(&[3, 2], vec![1i32, 2, 3, 4, 5, 6]);
        let err = c.compare_values("y", &a, &e).unwrap_err();
        match err {
            CheckError::ShapeMismatch { path, actual, expected } => {
                assert_eq!(path, "y");
                assert_eq!(actual, vec![2, 3]);
                assert_eq!(expected, vec![3, 2]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_exact_kinds_reject_single_difference() {
        let c = Comparator::default();
        let err = c
            .compare_values("y", &tensor(&[3], vec![1i64, 2, 3]), &tensor(&[3], vec![1i64, 2, 4]))
            .unwrap_err();
        match err {
            CheckError::ValueMismatch {
                detail: Mismatch::Element { kind, index, actual, expected },
                ..
            } => {
                assert_eq!(kind, ElementKind::Int64);
                assert_eq!(index, 2);
                assert_eq!(actual, "3");
                assert_eq!(expected, "4");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert!(c
            .compare_values("y", &tensor(&[1], vec![0x10u8]), &tensor(&[1], vec![0x11u8]))
            .is_err());
        assert!(c
            .compare_values("y", &tensor(&[1], vec![true]), &tensor(&[1], vec![false]))
            .is_err());
        assert!(c
            .compare_values(
                "y",
                &tensor(&[1], vec!["abc".to_string()]),
                &tensor(&[1], vec!["abd".to_string()])
            )
            .is_err());
    }

    #[test]
    fn test_float_tolerance() {
        let c = Comparator::default();
        c.compare_values("y", &tensor(&[1], vec![1.0000001f32]), &tensor(&[1], vec![1.0f32]))
            .unwrap();
        c.compare_values("y", &tensor(&[1], vec![1.0000001f64]), &tensor(&[1], vec![1.0f64]))
            .unwrap();
        assert!(c
            .compare_values("y", &tensor(&[1], vec![2.0f32]), &tensor(&[1], vec![1.0f32]))
            .is_err());
        assert!(c
            .compare_values("y", &tensor(&[1], vec![2.0f64]), &tensor(&[1], vec![1.0f64]))
            .is_err());
    }

    #[test]
    fn test_floats_close_rules() {
        // relative branch: large magnitudes
        assert!(floats_close(1_000_000.0, 1_000_050.0, 1e-5, 1e-4));
        assert!(!floats_close(1_000_000.0, 1_000_500.0, 1e-5, 1e-4));
        // absolute branch: near zero
        assert!(floats_close(0.0, 5e-6, 1e-5, 1e-4));
        assert!(floats_close(f64::NAN, f64::NAN, 0.0, 0.0));
        assert!(!floats_close(f64::NAN, 0.0, 1.0, 1.0));
        assert!(floats_close(f64::INFINITY, f64::INFINITY, 0.0, 0.0));
        assert!(!floats_close(f64::INFINITY, f64::NEG_INFINITY, 1.0, 1.0));
        assert!(!floats_close(f64::INFINITY, f64::MAX, 1.0, 1.0));
    }

    #[test]
    fn test_f64_is_tighter_than_f32() {
        let config = ToleranceConfig::default();
        assert!(config.f64_atol < config.f32_atol);
        assert!(config.f64_rtol < config.f32_rtol);
        let c = Comparator::default();
        c.compare_values("y", &tensor(&[1], vec![1.00001f32]), &tensor(&[1], vec![1.0f32]))
            .unwrap();
        assert!(c
            .compare_values("y", &tensor(&[1], vec![1.00001f64]), &tensor(&[1], vec![1.0f64]))
            .is_err());
    }

    #[test]
    fn test_reduced_precision_ulps() {
        let one = f16::from_f32(1.0);
        let step = |n: u16| f16::from_bits(one.to_bits() + n);
        assert!(f16_within_ulps(one, step(1), 2));
        assert!(f16_within_ulps(one, step(2), 2));
        assert!(!f16_within_ulps(one, step(3), 2));

        let b = bf16::from_f32(1.0);
        let bstep = |n: u16| bf16::from_bits(b.to_bits() + n);
        assert!(bf16_within_ulps(bstep(2), b, 2));
        assert!(!bf16_within_ulps(bstep(3), b, 2));

        let c = Comparator::default();
        c.compare_values("y", &tensor(&[2], vec![one, one]), &tensor(&[2], vec![one, step(2)]))
            .unwrap();
        let err = c
            .compare_values("y", &tensor(&[2], vec![one, one]), &tensor(&[2], vec![one, step(3)]))
            .unwrap_err();
        assert!(matches!(
            err,
            CheckError::ValueMismatch {
                detail: Mismatch::Element { index: 1, kind: ElementKind::Float16, .. },
                ..
            }
        ));
    }

    #[test]
    fn test_reduced_precision_special_values() {
        assert!(f16_within_ulps(f16::ZERO, f16::NEG_ZERO, 0));
        // smallest subnormals either side of zero are two steps apart
        assert!(f16_within_ulps(f16::from_bits(0x0001), f16::from_bits(0x8001), 2));
        assert!(!f16_within_ulps(f16::from_bits(0x0001), f16::from_bits(0x8001), 1));
        assert!(f16_within_ulps(f16::NAN, f16::from_bits(0x7e01), 0));
        assert!(!f16_within_ulps(f16::NAN, f16::INFINITY, 2));
        assert!(!bf16_within_ulps(bf16::NAN, bf16::ONE, 1000));
        assert!(!f16_within_ulps(f16::ONE, f16::NEG_ONE, 2));
        assert!(f16_within_ulps(f16::INFINITY, f16::INFINITY, 0));
        assert!(!f16_within_ulps(f16::INFINITY, f16::MAX, 2));
        assert!(!bf16_within_ulps(bf16::NEG_INFINITY, bf16::MIN, 2));
    }

    #[test]
    fn test_ulps_is_configurable() {
        let one = f16::from_f32(1.0);
        let far = f16::from_bits(one.to_bits() + 5);
        let strict = Comparator::default();
        let loose = Comparator::new(ToleranceConfig {
            reduced_precision_ulps: 8,
            ..ToleranceConfig::default()
        });
        let (a, e) = (tensor(&[1], vec![one]), tensor(&[1], vec![far]));
        assert!(strict.compare_values("y", &a, &e).is_err());
        loose.compare_values("y", &a, &e).unwrap();
    }

    #[test]
    fn test_kind_mismatch() {
        let c = Comparator::default();
        let err = c
            .compare_values("y", &tensor(&[1], vec![1i32]), &tensor(&[1], vec![1i64]))
            .unwrap_err();
        assert!(matches!(
            err,
            CheckError::ValueMismatch { detail: Mismatch::Kind { .. }, .. }
        ));
    }

    #[test]
    fn test_declared_kind_must_match_expected() {
        let c = Comparator::default();
        let v = tensor(&[1], vec![1.0f32]);
        let err = c
            .compare("y", &tensor_kind(ElementKind::Float64), &v, &v)
            .unwrap_err();
        assert!(matches!(
            err,
            CheckError::ValueMismatch { detail: Mismatch::Kind { .. }, .. }
        ));
    }

    #[test]
    fn test_nested_sequence_reports_position() {
        let c = Comparator::default();
        let leaf = |x: f32| tensor(&[1], vec![x]);
        let expected = Value::Sequence(vec![
            Value::Sequence(vec![leaf(1.0), leaf(2.0)]),
            Value::Sequence(vec![leaf(3.0), leaf(4.0)]),
        ]);
        let actual = Value::Sequence(vec![
            Value::Sequence(vec![leaf(1.0), leaf(2.0)]),
            Value::Sequence(vec![leaf(3.0), leaf(40.0)]),
        ]);
        let declared = SlotKind::Sequence(Box::new(SlotKind::Sequence(Box::new(tensor_kind(
            ElementKind::Float32,
        )))));

        c.compare("seq", &declared, &expected, &expected.clone()).unwrap();

        let err = c.compare("seq", &declared, &actual, &expected).unwrap_err();
        match err {
            CheckError::ValueMismatch {
                path,
                detail: Mismatch::Element { index, .. },
            } => {
                assert_eq!(path, "seq[1][1]");
                assert_eq!(index, 0);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = c.compare_values("seq", &actual, &expected).unwrap_err();
        assert!(matches!(err, CheckError::ValueMismatch { ref path, .. } if path == "seq[1][1]"));
    }

    #[test]
    fn test_sequence_length_mismatch() {
        let c = Comparator::default();
        let a = Value::Sequence(vec![tensor(&[1], vec![1u8])]);
        let e = Value::Sequence(vec![tensor(&[1], vec![1u8]), tensor(&[1], vec![2u8])]);
        let err = c.compare_values("s", &a, &e).unwrap_err();
        assert!(matches!(
            err,
            CheckError::ValueMismatch {
                detail: Mismatch::Length { actual: 1, expected: 2 },
                ..
            }
        ));
    }

    #[test]
    fn test_optional_unwrap() {
        let c = Comparator::default();
        let declared = SlotKind::Optional(Box::new(tensor_kind(ElementKind::Int32)));
        let some = Value::Optional(Some(Box::new(tensor(&[1], vec![7i32]))));
        let none = Value::Optional(None);

        c.compare("o", &declared, &some, &some.clone()).unwrap();
        c.compare("o", &declared, &none, &none.clone()).unwrap();
        // a bare tensor from the runtime counts as a present optional
        c.compare("o", &declared, &tensor(&[1], vec![7i32]), &some).unwrap();

        let err = c.compare("o", &declared, &none, &some).unwrap_err();
        assert!(matches!(
            err,
            CheckError::ValueMismatch {
                detail: Mismatch::Category { actual: "absent", expected: "present" },
                ..
            }
        ));
        assert!(c.compare_values("o", &some, &none).is_err());
    }

    #[test]
    fn test_unsupported_kinds() {
        let c = Comparator::default();
        let v = tensor(&[1], vec![1.0f32]);
        let err = c.compare("m", &SlotKind::Map, &v, &v).unwrap_err();
        assert!(matches!(err, CheckError::UnsupportedValueKind { .. }));
        let err = c
            .compare("m", &SlotKind::Unsupported("Complex64".to_string()), &v, &v)
            .unwrap_err();
        assert!(matches!(
            err,
            CheckError::UnsupportedValueKind { ref kind, .. } if kind == "Complex64"
        ));
    }

    #[test]
    fn test_category_mismatch() {
        let c = Comparator::default();
        let err = c
            .compare_values("x", &Value::Sequence(vec![]), &tensor(&[0], Vec::<f32>::new()))
            .unwrap_err();
        assert!(matches!(
            err,
            CheckError::ValueMismatch {
                detail: Mismatch::Category { actual: "sequence", expected: "tensor" },
                ..
            }
        ));
    }
}
