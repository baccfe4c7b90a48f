//! Lazy interpreter over the predicate AST.
//!
//! Every step yields nodes depth-first in document order, so the order of
//! bindings is stable for a given payload.

use super::ast::{CmpOp, FilterExpr, LeafTest, Operand, Path, PathRoot, Segment, Selector};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathElement {
    Key(String),
    Index(usize),
}

/// Normalized location of a matched node, rendered as `$['data'][0]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Location(Vec<PathElement>);

impl Location {
    pub fn elements(&self) -> &[PathElement] {
        &self.0
    }

    fn child(&self, element: PathElement) -> Location {
        let mut elements = self.0.clone();
        elements.push(element);
        Location(elements)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("$")?;
        for element in &self.0 {
            match element {
                PathElement::Key(key) => write!(f, "['{}']", key.replace('\\', "\\\\").replace('\'', "\\'"))?,
                PathElement::Index(index) => write!(f, "[{}]", index)?,
            }
        }
        Ok(())
    }
}

/// One way a predicate matched a payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding<'a> {
    pub value: &'a Value,
    pub location: Location,
}

pub(crate) type Bindings<'a> = Box<dyn Iterator<Item = Binding<'a>> + 'a>;

pub(crate) fn evaluate<'a>(path: &'a Path, test: Option<&'a LeafTest>, root: &'a Value) -> Bindings<'a> {
    let start = Binding {
        value: root,
        location: Location::default(),
    };
    let selected = select(&path.segments, start, root);
    match test {
        Some(test) => Box::new(selected.filter(move |binding| compare(binding.value, test.op, &test.literal))),
        None => selected,
    }
}

fn select<'a>(segments: &'a [Segment], node: Binding<'a>, root: &'a Value) -> Bindings<'a> {
    match segments.split_first() {
        None => Box::new(std::iter::once(node)),
        Some((segment, rest)) => {
            let stepped = apply_segment(segment, node, root);
            Box::new(stepped.flat_map(move |child| select(rest, child, root)))
        }
    }
}

fn apply_segment<'a>(segment: &'a Segment, node: Binding<'a>, root: &'a Value) -> Bindings<'a> {
    match segment {
        Segment::Child(selectors) => apply_selectors(selectors, node, root),
        Segment::Descendant(selectors) => Box::new(
            descendants_or_self(node).flat_map(move |n| apply_selectors(selectors, n, root)),
        ),
    }
}

fn apply_selectors<'a>(selectors: &'a [Selector], node: Binding<'a>, root: &'a Value) -> Bindings<'a> {
    if let [selector] = selectors {
        return apply_selector(selector, node, root);
    }
    Box::new(
        selectors
            .iter()
            .flat_map(move |selector| apply_selector(selector, node.clone(), root)),
    )
}

fn apply_selector<'a>(selector: &'a Selector, node: Binding<'a>, root: &'a Value) -> Bindings<'a> {
    match selector {
        Selector::Name(name) => match node.value {
            Value::Object(map) => match map.get(name) {
                Some(value) => Box::new(std::iter::once(Binding {
                    value,
                    location: node.location.child(PathElement::Key(name.clone())),
                })),
                None => Box::new(std::iter::empty()),
            },
            _ => Box::new(std::iter::empty()),
        },
        Selector::Index(index) => match node.value {
            Value::Array(items) => match normalize_index(*index, items.len()) {
                Some(i) => Box::new(std::iter::once(Binding {
                    value: &items[i],
                    location: node.location.child(PathElement::Index(i)),
                })),
                None => Box::new(std::iter::empty()),
            },
            _ => Box::new(std::iter::empty()),
        },
        Selector::Wildcard => children(&node),
        Selector::Slice { start, end, step } => match node.value {
            Value::Array(items) => {
                let location = node.location.clone();
                Box::new(
                    slice_indices(*start, *end, *step, items.len())
                        .into_iter()
                        .map(move |i| Binding {
                            value: &items[i],
                            location: location.child(PathElement::Index(i)),
                        }),
                )
            }
            _ => Box::new(std::iter::empty()),
        },
        Selector::Filter(filter) => {
            Box::new(children(&node).filter(move |child| test_filter(filter, child.value, root)))
        }
    }
}

fn children<'a>(node: &Binding<'a>) -> Bindings<'a> {
    let value: &'a Value = node.value;
    let location = node.location.clone();
    match value {
        Value::Array(items) => Box::new(items.iter().enumerate().map(move |(i, item)| Binding {
            value: item,
            location: location.child(PathElement::Index(i)),
        })),
        Value::Object(map) => Box::new(map.iter().map(move |(key, item)| Binding {
            value: item,
            location: location.child(PathElement::Key(key.clone())),
        })),
        _ => Box::new(std::iter::empty()),
    }
}

/// Pre-order walk: a node comes before all of its descendants.
fn descendants_or_self<'a>(node: Binding<'a>) -> Bindings<'a> {
    let below = children(&node);
    Box::new(std::iter::once(node).chain(below.flat_map(descendants_or_self)))
}

fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let resolved = if index < 0 { len + index } else { index };
    (0..len).contains(&resolved).then_some(resolved as usize)
}

fn slice_indices(start: Option<i64>, end: Option<i64>, step: i64, len: usize) -> Vec<usize> {
    let len = len as i64;
    let clamp = |bound: i64, low: i64, high: i64| {
        let resolved = if bound < 0 { bound + len } else { bound };
        resolved.clamp(low, high)
    };

    let mut indices = Vec::new();
    if step > 0 {
        let lower = start.map_or(0, |s| clamp(s, 0, len));
        let upper = end.map_or(len, |e| clamp(e, 0, len));
        let mut i = lower;
        while i < upper {
            indices.push(i as usize);
            i = match i.checked_add(step) {
                Some(next) => next,
                None => break,
            };
        }
    } else {
        let upper = start.map_or(len - 1, |s| clamp(s, -1, len - 1));
        let lower = end.map_or(-1, |e| clamp(e, -1, len - 1));
        let mut i = upper;
        while i > lower {
            indices.push(i as usize);
            i = match i.checked_add(step) {
                Some(next) => next,
                None => break,
            };
        }
    }
    indices
}

fn resolve<'a>(path: &'a Path, current: &'a Value, root: &'a Value) -> Bindings<'a> {
    let start = match path.root {
        PathRoot::Document => root,
        PathRoot::Current => current,
    };
    select(
        &path.segments,
        Binding {
            value: start,
            location: Location::default(),
        },
        root,
    )
}

fn test_filter(filter: &FilterExpr, current: &Value, root: &Value) -> bool {
    match filter {
        FilterExpr::Exists(path) => resolve(path, current, root).next().is_some(),
        FilterExpr::Constant(value) => *value,
        FilterExpr::Compare { left, op, right } => {
            let lefts = operand_values(left, current, root);
            let rights = operand_values(right, current, root);
            lefts
                .iter()
                .any(|l| rights.iter().any(|r| compare(l, *op, r)))
        }
        FilterExpr::And(a, b) => test_filter(a, current, root) && test_filter(b, current, root),
        FilterExpr::Or(a, b) => test_filter(a, current, root) || test_filter(b, current, root),
        FilterExpr::Not(inner) => !test_filter(inner, current, root),
    }
}

fn operand_values<'a>(operand: &'a Operand, current: &'a Value, root: &'a Value) -> Vec<&'a Value> {
    match operand {
        Operand::Literal(value) => vec![value],
        Operand::Path(path) => resolve(path, current, root).map(|b| b.value).collect(),
    }
}

/// Compare two leaf values. Mismatched kinds never match.
pub(crate) fn compare(left: &Value, op: CmpOp, right: &Value) -> bool {
    match op {
        CmpOp::Eq => values_equal(left, right),
        CmpOp::Ne => same_kind(left, right) && !values_equal(left, right),
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
            let ordering = match (left, right) {
                (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
                    (Some(a), Some(b)) => a.partial_cmp(&b),
                    _ => None,
                },
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => None,
            };
            let Some(ordering) = ordering else {
                return false;
            };
            match op {
                CmpOp::Lt => ordering.is_lt(),
                CmpOp::Le => ordering.is_le(),
                CmpOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }
        }
        CmpOp::Contains => match (left, right) {
            (Value::Array(items), needle) => items.iter().any(|item| values_equal(item, needle)),
            (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
            _ => false,
        },
        CmpOp::In => match right {
            Value::Array(items) => items.iter().any(|item| values_equal(left, item)),
            _ => false,
        },
    }
}

fn same_kind(left: &Value, right: &Value) -> bool {
    std::mem::discriminant(left) == std::mem::discriminant(right)
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a == b,
            _ => a.as_f64() == b.as_f64(),
        },
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a
                    .iter()
                    .all(|(key, x)| b.get(key).is_some_and(|y| values_equal(x, y)))
        }
        _ => left == right,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_compute_python_style_slices() {
        assert_eq!(slice_indices(Some(1), Some(3), 1, 5), vec![1, 2]);
        assert_eq!(slice_indices(None, None, 2, 5), vec![0, 2, 4]);
        assert_eq!(slice_indices(Some(-2), None, 1, 5), vec![3, 4]);
        assert_eq!(slice_indices(None, None, -1, 3), vec![2, 1, 0]);
        assert_eq!(slice_indices(Some(10), Some(20), 1, 3), Vec::<usize>::new());
    }

    #[test]
    fn should_normalize_negative_indices() {
        assert_eq!(normalize_index(-1, 3), Some(2));
        assert_eq!(normalize_index(3, 3), None);
        assert_eq!(normalize_index(-4, 3), None);
    }

    #[test]
    fn should_compare_numbers_by_value_and_reject_mixed_types() {
        use serde_json::json;

        assert!(compare(&json!(42), CmpOp::Eq, &json!(42.0)));
        assert!(!compare(&json!(42), CmpOp::Eq, &json!("42")));
        assert!(!compare(&json!(42), CmpOp::Ne, &json!("42")));
        assert!(!compare(&json!("b"), CmpOp::Lt, &json!(1)));
        assert!(compare(&json!("a"), CmpOp::Lt, &json!("b")));
    }

    #[test]
    fn should_render_locations() {
        let location = Location::default()
            .child(PathElement::Key("data".into()))
            .child(PathElement::Index(0));

        assert_eq!(location.to_string(), "$['data'][0]");
    }

    #[test]
    fn should_escape_backslashes_and_quotes_in_keys() {
        let backslash = Location::default().child(PathElement::Key("a\\'".into()));
        let quote = Location::default().child(PathElement::Key("a'".into()));

        assert_eq!(backslash.to_string(), r"$['a\\\'']");
        assert_eq!(quote.to_string(), r"$['a\'']");
        assert_ne!(backslash.to_string(), quote.to_string());
    }

    #[test]
    fn should_stop_slices_at_extreme_steps() {
        assert_eq!(slice_indices(Some(1), None, i64::MAX, 3), vec![1]);
        assert_eq!(slice_indices(None, None, i64::MAX, 3), vec![0]);
        assert_eq!(slice_indices(Some(1), None, i64::MIN, 3), vec![1]);
        assert_eq!(slice_indices(None, None, i64::MIN, 3), vec![2]);
    }
}
