//! Generator functions
//!
//! The closed set of value producers a template may invoke through
//! `{"func": ..., "param": {...}}`. Each generator reads and updates its
//! node's [`ParamState`] in place; that bag is the only state carried from
//! one evaluation to the next.

use std::fmt::Write as _;
use std::ops::RangeInclusive;

use chrono::Local;
use chrono::format::{Item, StrftimeItems};
use rand::Rng;
use rand::seq::SliceRandom;
use rand_distr::{Distribution, Normal};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// Mutable parameter bag owned by one function-call node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamState {
    fields: Map<String, Value>,
}

impl ParamState {
    /// Wrap an ordered JSON object
    #[must_use]
    pub const fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Get a field
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Whether the field exists
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Overwrite a field, returning the previous value
    pub fn set(&mut self, key: &str, value: Value) -> Option<Value> {
        self.fields.insert(key.to_string(), value)
    }

    /// Snapshot as a JSON object, for logging
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    /// Read a numeric field
    ///
    /// # Errors
    ///
    /// Returns error if the field is missing or not a number
    pub fn number(&self, key: &str) -> Result<f64> {
        match self.fields.get(key) {
            Some(Value::Number(n)) => n
                .as_f64()
                .ok_or_else(|| Error::Generator(format!("param \"{key}\" is out of range"))),
            Some(other) => Err(Error::Generator(format!(
                "param \"{key}\" is not a number: {other}"
            ))),
            None => Err(Error::Generator(format!("param \"{key}\" is missing"))),
        }
    }

    /// Read a numeric field that may be absent
    ///
    /// # Errors
    ///
    /// Returns error if the field is present but not a number
    pub fn optional_number(&self, key: &str) -> Result<Option<f64>> {
        match self.fields.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.number(key).map(Some),
        }
    }

    fn list(&self, key: &str) -> Result<&[Value]> {
        match self.fields.get(key) {
            Some(Value::Array(items)) if !items.is_empty() => Ok(items),
            Some(Value::Array(_)) => Err(Error::Generator(format!("param \"{key}\" is empty"))),
            Some(other) => Err(Error::Generator(format!(
                "param \"{key}\" is not a list: {other}"
            ))),
            None => Err(Error::Generator(format!("param \"{key}\" is missing"))),
        }
    }

    fn text(&self, key: &str) -> Result<&str> {
        match self.fields.get(key) {
            Some(Value::String(s)) => Ok(s),
            Some(other) => Err(Error::Generator(format!(
                "param \"{key}\" is not a string: {other}"
            ))),
            None => Err(Error::Generator(format!("param \"{key}\" is missing"))),
        }
    }
}

/// Generator kinds available to templates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Generator {
    /// Returns `cur` unchanged
    Constant,
    /// `cur += delta`, unbounded ramp
    Linear,
    /// `cur += uniform(-rand, rand)`, clamped to optional `[min, max]`
    RandomWalk,
    /// Ramp between `min` and `max`, reflecting at the extremes
    TriangleWave,
    /// Stateless draw in `[min, max]`
    Uniform,
    /// Stateless normal draw with `mean` and `sigma`
    Gaussian,
    /// Random element of `list`
    Choice,
    /// Round-robin over `list`, position kept in `last`
    CyclicChoice,
    /// Current local time formatted with `fmt`
    DateFormat,
}

impl Generator {
    /// Resolve a `func` name, accepting the legacy spellings too
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "constant" => Some(Self::Constant),
            "linear" => Some(Self::Linear),
            "randomWalk" | "randWalk" => Some(Self::RandomWalk),
            "triangleWave" => Some(Self::TriangleWave),
            "uniform" | "randUniform" => Some(Self::Uniform),
            "gaussian" | "randGauss" => Some(Self::Gaussian),
            "choice" | "randChoice" => Some(Self::Choice),
            "cyclicChoice" | "nextChoice" => Some(Self::CyclicChoice),
            "dateFormat" | "date" => Some(Self::DateFormat),
            _ => None,
        }
    }

    /// Canonical name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Constant => "constant",
            Self::Linear => "linear",
            Self::RandomWalk => "randomWalk",
            Self::TriangleWave => "triangleWave",
            Self::Uniform => "uniform",
            Self::Gaussian => "gaussian",
            Self::Choice => "choice",
            Self::CyclicChoice => "cyclicChoice",
            Self::DateFormat => "dateFormat",
        }
    }

    const fn required(&self) -> &'static [&'static str] {
        match self {
            Self::Constant => &["cur"],
            Self::Linear => &["cur", "delta"],
            Self::RandomWalk => &["cur", "rand"],
            Self::TriangleWave => &["cur", "delta", "min", "max"],
            Self::Uniform => &["min", "max"],
            Self::Gaussian => &["mean", "sigma"],
            Self::Choice | Self::CyclicChoice => &["list"],
            Self::DateFormat => &["fmt"],
        }
    }

    /// Check parameters once at load time
    ///
    /// # Errors
    ///
    /// Returns `InvalidParam` naming the first problem found
    pub fn validate(&self, params: &ParamState) -> Result<()> {
        let invalid = |reason: String| Error::InvalidParam {
            func: self.as_str(),
            reason,
        };

        for key in self.required() {
            if !params.contains(key) {
                return Err(invalid(format!("missing param \"{key}\"")));
            }
        }

        match self {
            Self::Constant => {}
            Self::Linear => {
                params.number("cur").map_err(|e| invalid(detail(e)))?;
                params.number("delta").map_err(|e| invalid(detail(e)))?;
            }
            Self::RandomWalk => {
                params.number("cur").map_err(|e| invalid(detail(e)))?;
                let spread = params.number("rand").map_err(|e| invalid(detail(e)))?;
                draw_range(-spread.abs(), spread.abs()).map_err(|e| invalid(detail(e)))?;
                let min = params.optional_number("min").map_err(|e| invalid(detail(e)))?;
                let max = params.optional_number("max").map_err(|e| invalid(detail(e)))?;
                if let (Some(min), Some(max)) = (min, max) {
                    if min > max {
                        return Err(invalid(format!("min {min} is greater than max {max}")));
                    }
                }
            }
            Self::TriangleWave | Self::Uniform => {
                for key in self.required() {
                    params.number(key).map_err(|e| invalid(detail(e)))?;
                }
                let (min, max) = bounds(params).map_err(|e| invalid(detail(e)))?;
                if *self == Self::Uniform {
                    draw_range(min, max).map_err(|e| invalid(detail(e)))?;
                }
            }
            Self::Gaussian => {
                params.number("mean").map_err(|e| invalid(detail(e)))?;
                let sigma = params.number("sigma").map_err(|e| invalid(detail(e)))?;
                if sigma < 0.0 {
                    return Err(invalid(format!("sigma {sigma} is negative")));
                }
            }
            Self::Choice | Self::CyclicChoice => {
                params.list("list").map_err(|e| invalid(detail(e)))?;
            }
            Self::DateFormat => {
                let fmt = params.text("fmt").map_err(|e| invalid(detail(e)))?;
                strftime_items(fmt).map_err(|e| invalid(detail(e)))?;
            }
        }

        Ok(())
    }

    /// Produce the next value, updating `params` in place
    ///
    /// # Errors
    ///
    /// Returns `Generator` if the current parameters cannot produce a value,
    /// e.g. after a set command stored a string where a number was expected
    pub fn call<R: Rng + ?Sized>(&self, params: &mut ParamState, rng: &mut R) -> Result<Value> {
        match self {
            Self::Constant => params
                .get("cur")
                .cloned()
                .ok_or_else(|| Error::Generator("param \"cur\" is missing".to_string())),
            Self::Linear => linear(params),
            Self::RandomWalk => random_walk(params, rng),
            Self::TriangleWave => triangle_wave(params),
            Self::Uniform => {
                let (min, max) = bounds(params)?;
                float(round_to(draw(rng, min, max)?, 2))
            }
            Self::Gaussian => {
                let normal = Normal::new(params.number("mean")?, params.number("sigma")?)
                    .map_err(|e| Error::Generator(format!("gaussian: {e}")))?;
                float(round_to(normal.sample(rng), 2))
            }
            Self::Choice => params
                .list("list")?
                .choose(rng)
                .cloned()
                .ok_or_else(|| Error::Generator("param \"list\" is empty".to_string())),
            Self::CyclicChoice => cyclic_choice(params),
            Self::DateFormat => date_format(params),
        }
    }
}

impl std::fmt::Display for Generator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn linear(params: &mut ParamState) -> Result<Value> {
    let ints = (
        params.get("cur").and_then(Value::as_i64),
        params.get("delta").and_then(Value::as_i64),
    );
    let next = if let (Some(cur), Some(delta)) = ints {
        cur.checked_add(delta)
            .map(Value::from)
            .ok_or_else(|| Error::Generator("linear: integer overflow".to_string()))?
    } else {
        float(params.number("cur")? + params.number("delta")?)?
    };
    params.set("cur", next.clone());
    Ok(next)
}

fn random_walk<R: Rng + ?Sized>(params: &mut ParamState, rng: &mut R) -> Result<Value> {
    let spread = params.number("rand")?.abs();
    let mut cur = params.number("cur")? + draw(rng, -spread, spread)?;

    let max = params.optional_number("max")?;
    let min = params.optional_number("min")?;
    if let Some(max) = max.filter(|max| cur > *max) {
        cur = max;
    } else if let Some(min) = min.filter(|min| cur < *min) {
        cur = min;
    }

    params.set("cur", float(cur)?);
    float(round_to(cur, 2))
}

fn triangle_wave(params: &mut ParamState) -> Result<Value> {
    let (min, max) = bounds(params)?;
    let mut delta = params.number("delta")?;
    let mut cur = params.number("cur")? + delta;

    if cur > max {
        cur = max;
        delta = -delta;
    } else if cur < min {
        cur = min;
        delta = -delta;
    }

    params.set("cur", float(cur)?);
    params.set("delta", float(delta)?);
    float(round_to(cur, 6))
}

fn cyclic_choice(params: &mut ParamState) -> Result<Value> {
    let list = params.list("list")?;
    let len = list.len();
    let next = match params.get("last") {
        None | Some(Value::Null) => 0,
        Some(last) => {
            let last = last
                .as_u64()
                .and_then(|l| usize::try_from(l).ok())
                .ok_or_else(|| Error::Generator(format!("param \"last\" is not an index: {last}")))?;
            (last % len + 1) % len
        }
    };
    let value = list[next].clone();
    params.set("last", Value::from(next));
    Ok(value)
}

fn date_format(params: &ParamState) -> Result<Value> {
    let items = strftime_items(params.text("fmt")?)?;
    let mut out = String::new();
    write!(out, "{}", Local::now().format_with_items(items.iter()))
        .map_err(|_| Error::Generator("dateFormat: formatting failed".to_string()))?;
    Ok(Value::String(out))
}

fn strftime_items(fmt: &str) -> Result<Vec<Item<'_>>> {
    let items: Vec<Item<'_>> = StrftimeItems::new(fmt).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(Error::Generator(format!("invalid date format \"{fmt}\"")));
    }
    Ok(items)
}

fn detail(e: Error) -> String {
    match e {
        Error::Generator(msg) => msg,
        other => other.to_string(),
    }
}

fn bounds(params: &ParamState) -> Result<(f64, f64)> {
    let (min, max) = (params.number("min")?, params.number("max")?);
    if min > max {
        return Err(Error::Generator(format!(
            "min {min} is greater than max {max}"
        )));
    }
    Ok((min, max))
}

/// Check that `[low, high]` can be sampled: its width must be finite
fn draw_range(low: f64, high: f64) -> Result<RangeInclusive<f64>> {
    if (high - low).is_finite() {
        Ok(low..=high)
    } else {
        Err(Error::Generator(format!(
            "range [{low}, {high}] is too wide to draw from"
        )))
    }
}

fn draw<R: Rng + ?Sized>(rng: &mut R, low: f64, high: f64) -> Result<f64> {
    Ok(rng.gen_range(draw_range(low, high)?))
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

fn float(value: f64) -> Result<Value> {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| Error::Generator(format!("non-finite value {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use serde_json::json;

    fn params(value: Value) -> ParamState {
        match value {
            Value::Object(map) => ParamState::new(map),
            other => panic!("not an object: {other}"),
        }
    }

    fn run(generator: Generator, state: &mut ParamState, times: usize) -> Vec<Value> {
        let mut rng = StdRng::seed_from_u64(7);
        (0..times)
            .map(|_| generator.call(state, &mut rng).unwrap())
            .collect()
    }

    #[test]
    fn resolves_canonical_and_legacy_names() {
        assert_eq!(Generator::from_name("randomWalk"), Some(Generator::RandomWalk));
        assert_eq!(Generator::from_name("randWalk"), Some(Generator::RandomWalk));
        assert_eq!(Generator::from_name("nextChoice"), Some(Generator::CyclicChoice));
        assert_eq!(Generator::from_name("date"), Some(Generator::DateFormat));
        assert_eq!(Generator::from_name("sawtooth"), None);
    }

    #[test]
    fn constant_returns_cur_untouched() {
        let mut state = params(json!({"cur": {"nested": [1, 2]}}));
        let out = run(Generator::Constant, &mut state, 3);
        assert!(out.iter().all(|v| *v == json!({"nested": [1, 2]})));
    }

    #[test]
    fn linear_keeps_integers() {
        let mut state = params(json!({"cur": 0, "delta": 2}));
        assert_eq!(run(Generator::Linear, &mut state, 3), vec![json!(2), json!(4), json!(6)]);
        assert_eq!(state.get("cur"), Some(&json!(6)));
    }

    #[test]
    fn linear_with_float_delta() {
        let mut state = params(json!({"cur": 1, "delta": 0.5}));
        let out = run(Generator::Linear, &mut state, 2);
        assert_eq!(out[1].as_f64(), Some(2.0));
    }

    #[test]
    fn triangle_wave_reflects_at_bounds() {
        let mut state = params(json!({"cur": 9, "delta": 3, "min": 0, "max": 10}));
        let out: Vec<f64> = run(Generator::TriangleWave, &mut state, 6)
            .iter()
            .map(|v| v.as_f64().unwrap())
            .collect();
        assert_eq!(out, vec![10.0, 7.0, 4.0, 1.0, 0.0, 3.0]);
        assert_eq!(state.number("delta").unwrap(), 3.0);
    }

    #[test]
    fn triangle_wave_flips_delta_at_max() {
        let mut state = params(json!({"cur": 9, "delta": 3, "min": 0, "max": 10}));
        run(Generator::TriangleWave, &mut state, 1);
        assert_eq!(state.number("delta").unwrap(), -3.0);
        assert_eq!(state.number("cur").unwrap(), 10.0);
    }

    #[test]
    fn cyclic_choice_wraps() {
        let mut state = params(json!({"list": ["a", "b", "c"]}));
        let out = run(Generator::CyclicChoice, &mut state, 4);
        assert_eq!(out, vec![json!("a"), json!("b"), json!("c"), json!("a")]);
        assert_eq!(state.get("last"), Some(&json!(0)));
    }

    #[test]
    fn cyclic_choice_tolerates_out_of_range_last() {
        let mut state = params(json!({"list": ["a", "b"], "last": 7}));
        assert_eq!(run(Generator::CyclicChoice, &mut state, 1), vec![json!("a")]);
    }

    #[test]
    fn random_walk_stays_within_bounds() {
        let mut state = params(json!({"cur": 20, "rand": 5, "min": 15, "max": 25}));
        for value in run(Generator::RandomWalk, &mut state, 200) {
            let v = value.as_f64().unwrap();
            assert!((15.0..=25.0).contains(&v), "{v} escaped bounds");
            assert!((v * 100.0 - (v * 100.0).round()).abs() < 1e-6);
        }
    }

    #[test]
    fn uniform_and_gaussian_draws() {
        let mut state = params(json!({"min": -1, "max": 1}));
        for value in run(Generator::Uniform, &mut state, 50) {
            assert!((-1.0..=1.0).contains(&value.as_f64().unwrap()));
        }

        let mut state = params(json!({"mean": 12.5, "sigma": 0}));
        assert_eq!(run(Generator::Gaussian, &mut state, 1)[0].as_f64(), Some(12.5));
    }

    #[test]
    fn choice_picks_from_list() {
        let mut state = params(json!({"list": [1, 2, 3]}));
        for value in run(Generator::Choice, &mut state, 20) {
            assert!([json!(1), json!(2), json!(3)].contains(&value));
        }
        assert!(!state.contains("last"));
    }

    #[test]
    fn date_format_uses_strftime() {
        let mut state = params(json!({"fmt": "%Y"}));
        let out = run(Generator::DateFormat, &mut state, 1);
        assert_eq!(out[0], json!(Local::now().format("%Y").to_string()));
    }

    #[test]
    fn validate_rejects_missing_and_bad_params() {
        let err = Generator::Linear
            .validate(&params(json!({"cur": 1})))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParam { func: "linear", .. }));

        assert!(
            Generator::TriangleWave
                .validate(&params(json!({"cur": 1, "delta": 1, "min": 5, "max": 0})))
                .is_err()
        );
        assert!(Generator::CyclicChoice.validate(&params(json!({"list": []}))).is_err());
        assert!(Generator::DateFormat.validate(&params(json!({"fmt": "%Q"}))).is_err());
        assert!(Generator::Gaussian.validate(&params(json!({"mean": 0, "sigma": 1}))).is_ok());
    }

    #[test]
    fn overly_wide_ranges_are_rejected_at_load() {
        let err = Generator::Uniform
            .validate(&params(json!({"min": -1e308, "max": 1e308})))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParam { func: "uniform", .. }));

        assert!(
            Generator::RandomWalk
                .validate(&params(json!({"cur": 0, "rand": 1e308})))
                .is_err()
        );
        assert!(
            Generator::TriangleWave
                .validate(&params(json!({"cur": 0, "delta": 1, "min": -1e308, "max": 1e308})))
                .is_ok()
        );
    }

    #[test]
    fn overly_wide_ranges_fail_at_runtime_without_panicking() {
        let mut rng = StdRng::seed_from_u64(1);

        let mut state = params(json!({"cur": 0, "rand": 1e308}));
        assert!(matches!(
            Generator::RandomWalk.call(&mut state, &mut rng),
            Err(Error::Generator(_))
        ));

        let mut state = params(json!({"min": -1e308, "max": 1e308}));
        assert!(matches!(
            Generator::Uniform.call(&mut state, &mut rng),
            Err(Error::Generator(_))
        ));
    }

    #[test]
    fn call_reports_non_numeric_state() {
        let mut state = params(json!({"cur": true, "delta": 1}));
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(
            Generator::Linear.call(&mut state, &mut rng),
            Err(Error::Generator(_))
        ));
    }
}
