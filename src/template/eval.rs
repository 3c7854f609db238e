//! Template evaluation

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::{Map, Value};

use super::{FunctionCall, TemplateNode};
use crate::Result;

/// Walks template trees and runs their generators
#[derive(Debug)]
pub struct Evaluator {
    rng: StdRng,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    /// Create an evaluator seeded from system entropy
    #[must_use]
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Create an evaluator with a fixed seed, for reproducible runs
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Produce the concrete value of `node`
    ///
    /// Literals come back unchanged; function calls run their generator and
    /// update their parameters in place; objects and arrays are rebuilt in
    /// template order.
    ///
    /// # Errors
    ///
    /// Returns the first generator error met in the tree
    pub fn evaluate(&mut self, node: &mut TemplateNode) -> Result<Value> {
        match node {
            TemplateNode::Literal(value) => Ok(value.clone()),
            TemplateNode::Call(call) => self.call(call),
            TemplateNode::Object { fields, .. } => {
                let mut out = Map::new();
                for (key, child) in fields.iter_mut() {
                    out.insert(key.clone(), self.evaluate(child)?);
                }
                Ok(Value::Object(out))
            }
            TemplateNode::Array(items) => items
                .iter_mut()
                .map(|child| self.evaluate(child))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
        }
    }

    fn call(&mut self, call: &mut FunctionCall) -> Result<Value> {
        tracing::trace!(func = %call.generator, param = %call.params.to_value(), "param before");
        let value = call.generator.call(&mut call.params, &mut self.rng)?;
        tracing::trace!(func = %call.generator, param = %call.params.to_value(), "param after");
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn template(value: Value) -> TemplateNode {
        TemplateNode::from_value(value).unwrap()
    }

    #[test]
    fn literals_are_identity() {
        let mut evaluator = Evaluator::with_seed(1);
        for value in [json!(null), json!(true), json!(3.5), json!("on")] {
            let mut node = template(value.clone());
            assert_eq!(evaluator.evaluate(&mut node).unwrap(), value);
            assert_eq!(evaluator.evaluate(&mut node).unwrap(), value);
        }
    }

    #[test]
    fn objects_keep_template_order() {
        let mut node = template(json!({
            "z": 1,
            "#comment": "x",
            "a": {"func": "constant", "param": {"cur": "up"}},
            "m": [1, {"func": "linear", "param": {"cur": 0, "delta": 1}}]
        }));
        let out = Evaluator::with_seed(1).evaluate(&mut node).unwrap();
        assert_eq!(
            serde_json::to_string(&out).unwrap(),
            r#"{"z":1,"a":"up","m":[1,1]}"#
        );
    }

    #[test]
    fn state_advances_across_evaluations() {
        let mut node = template(json!({"n": {"func": "linear", "param": {"cur": 10, "delta": -1}}}));
        let mut evaluator = Evaluator::with_seed(1);
        evaluator.evaluate(&mut node).unwrap();
        let out = evaluator.evaluate(&mut node).unwrap();
        assert_eq!(out, json!({"n": 8}));
    }

    #[test]
    fn markers_are_not_emitted() {
        let mut node = template(json!({
            "get": "dev/get",
            "t": {"func": "constant", "param": {"cur": 1}, "set:dev/t": "cur"}
        }));
        let out = Evaluator::with_seed(1).evaluate(&mut node).unwrap();
        assert_eq!(out, json!({"t": 1}));
    }
}
