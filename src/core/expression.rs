//! Band-math expressions.
//!
//! An expression is ASCII arithmetic over band tokens (`b4`, `b10`, `b8A`),
//! numeric literals, `+ - * /` and parentheses. Comma-separated segments each
//! produce one output band, left to right. Results are always finite: any
//! NaN or infinity (including 0/0 and x/0) is replaced by 0 once a segment
//! has been evaluated.
use std::collections::HashMap;
use std::str::FromStr;

use ndarray::{Array2, ArrayView2, Zip};
use thiserror::Error;

/// Errors raised while parsing or evaluating an expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    #[error("empty expression")]
    Empty,
    #[error("empty output band at segment {0}")]
    EmptySegment(usize),
    #[error("unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },
    #[error("unexpected token '{token}' at position {pos}")]
    UnexpectedToken { token: String, pos: usize },
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("band token without label at position {0}")]
    MissingBandLabel(usize),
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
    #[error("expression references no band")]
    NoBands,
    #[error("band b{0} referenced but not supplied")]
    MissingBand(String),
    #[error("band samples differ in shape: {expected:?} vs {got:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        got: (usize, usize),
    },
}

impl ExpressionError {
    /// True when the expression text itself is at fault, false for errors
    /// raised while evaluating it against band samples.
    pub fn is_syntax(&self) -> bool {
        !matches!(
            self,
            ExpressionError::MissingBand(_) | ExpressionError::ShapeMismatch { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
}

impl Op {
    #[inline]
    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            Op::Add => a + b,
            Op::Sub => a - b,
            Op::Mul => a * b,
            Op::Div => a / b,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Number(f64),
    Band(String),
    Neg(Box<Node>),
    Binary(Op, Box<Node>, Box<Node>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Band(String),
    Op(Op),
    LParen,
    RParen,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{n}"),
            Token::Band(l) => write!(f, "b{l}"),
            Token::Op(Op::Add) => write!(f, "+"),
            Token::Op(Op::Sub) => write!(f, "-"),
            Token::Op(Op::Mul) => write!(f, "*"),
            Token::Op(Op::Div) => write!(f, "/"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
        }
    }
}

/// Band labels are at most two characters of digits or `A` (`8A`).
const MAX_LABEL_LEN: usize = 2;

#[inline]
fn is_label_char(c: char) -> bool {
    c.is_ascii_digit() || c == 'A'
}

fn tokenize(src: &str, base: usize) -> Result<Vec<(Token, usize)>, ExpressionError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let pos = base + i;
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '+' => {
                tokens.push((Token::Op(Op::Add), pos));
                i += 1;
            }
            '-' => {
                tokens.push((Token::Op(Op::Sub), pos));
                i += 1;
            }
            '*' => {
                tokens.push((Token::Op(Op::Mul), pos));
                i += 1;
            }
            '/' => {
                tokens.push((Token::Op(Op::Div), pos));
                i += 1;
            }
            '(' => {
                tokens.push((Token::LParen, pos));
                i += 1;
            }
            ')' => {
                tokens.push((Token::RParen, pos));
                i += 1;
            }
            'b' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && end - start < MAX_LABEL_LEN && is_label_char(chars[end]) {
                    end += 1;
                }
                if end == start {
                    return Err(ExpressionError::MissingBandLabel(pos));
                }
                let label: String = chars[start..end].iter().collect();
                tokens.push((Token::Band(label), pos));
                i = end;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // Optional exponent: 1e-3, 2.5E4
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        while j < chars.len() && chars[j].is_ascii_digit() {
                            j += 1;
                        }
                        i = j;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| ExpressionError::InvalidNumber(text.clone()))?;
                tokens.push((Token::Number(value), base + start));
            }
            other => return Err(ExpressionError::UnexpectedChar { ch: other, pos }),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn next(&mut self) -> Option<(Token, usize)> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expr(&mut self) -> Result<Node, ExpressionError> {
        let mut lhs = self.term()?;
        while let Some(Token::Op(op @ (Op::Add | Op::Sub))) = self.peek() {
            let op = *op;
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Node, ExpressionError> {
        let mut lhs = self.factor()?;
        while let Some(Token::Op(op @ (Op::Mul | Op::Div))) = self.peek() {
            let op = *op;
            self.pos += 1;
            let rhs = self.factor()?;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn factor(&mut self) -> Result<Node, ExpressionError> {
        match self.next() {
            Some((Token::Op(Op::Sub), _)) => Ok(Node::Neg(Box::new(self.factor()?))),
            Some((Token::Op(Op::Add), _)) => self.factor(),
            Some((Token::Number(n), _)) => Ok(Node::Number(n)),
            Some((Token::Band(label), _)) => Ok(Node::Band(label)),
            Some((Token::LParen, _)) => {
                let inner = self.expr()?;
                match self.next() {
                    Some((Token::RParen, _)) => Ok(inner),
                    Some((t, pos)) => Err(ExpressionError::UnexpectedToken {
                        token: t.to_string(),
                        pos,
                    }),
                    None => Err(ExpressionError::UnexpectedEnd),
                }
            }
            Some((t, pos)) => Err(ExpressionError::UnexpectedToken {
                token: t.to_string(),
                pos,
            }),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }
}

fn collect_labels(node: &Node, labels: &mut Vec<String>) {
    match node {
        Node::Number(_) => {}
        Node::Band(l) => {
            if !labels.iter().any(|x| x == l) {
                labels.push(l.clone());
            }
        }
        Node::Neg(inner) => collect_labels(inner, labels),
        Node::Binary(_, a, b) => {
            collect_labels(a, labels);
            collect_labels(b, labels);
        }
    }
}

/// Intermediate result: a scalar or a 2-D sample.
enum Value<'a> {
    Scalar(f64),
    View(ArrayView2<'a, f64>),
    Owned(Array2<f64>),
}

impl<'a> Value<'a> {
    fn view(&self) -> Option<ArrayView2<'_, f64>> {
        match self {
            Value::Scalar(_) => None,
            Value::View(v) => Some(v.view()),
            Value::Owned(a) => Some(a.view()),
        }
    }
}

fn eval<'a, F>(node: &Node, lookup: &F) -> Result<Value<'a>, ExpressionError>
where
    F: Fn(&str) -> Option<Value<'a>>,
{
    match node {
        Node::Number(n) => Ok(Value::Scalar(*n)),
        Node::Band(label) => lookup(label).ok_or_else(|| ExpressionError::MissingBand(label.clone())),
        Node::Neg(inner) => Ok(match eval(inner, lookup)? {
            Value::Scalar(v) => Value::Scalar(-v),
            other => {
                let v = other.view().ok_or(ExpressionError::Empty)?;
                Value::Owned(v.mapv(|x| -x))
            }
        }),
        Node::Binary(op, a, b) => {
            let op = *op;
            let lhs = eval(a, lookup)?;
            let rhs = eval(b, lookup)?;
            let out = match (&lhs, &rhs) {
                (Value::Scalar(x), Value::Scalar(y)) => Value::Scalar(op.apply(*x, *y)),
                (Value::Scalar(x), _) => {
                    let x = *x;
                    let r = rhs.view().ok_or(ExpressionError::Empty)?;
                    Value::Owned(r.mapv(|y| op.apply(x, y)))
                }
                (_, Value::Scalar(y)) => {
                    let y = *y;
                    let l = lhs.view().ok_or(ExpressionError::Empty)?;
                    Value::Owned(l.mapv(|x| op.apply(x, y)))
                }
                _ => {
                    let l = lhs.view().ok_or(ExpressionError::Empty)?;
                    let r = rhs.view().ok_or(ExpressionError::Empty)?;
                    if l.dim() != r.dim() {
                        return Err(ExpressionError::ShapeMismatch {
                            expected: l.dim(),
                            got: r.dim(),
                        });
                    }
                    Value::Owned(Zip::from(l).and(r).map_collect(|&x, &y| op.apply(x, y)))
                }
            };
            Ok(out)
        }
    }
}

#[inline]
fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() { v } else { 0.0 }
}

/// Replace NaN and +/-infinity by 0 in place.
pub fn nan_to_zero(sample: &mut Array2<f64>) {
    sample.mapv_inplace(finite_or_zero);
}

/// A parsed band-math expression, one syntax tree per output band.
#[derive(Debug, Clone, PartialEq)]
pub struct BandExpression {
    source: String,
    outputs: Vec<Node>,
    labels: Vec<String>,
}

impl BandExpression {
    pub fn parse(src: &str) -> Result<Self, ExpressionError> {
        if src.trim().is_empty() {
            return Err(ExpressionError::Empty);
        }
        let mut outputs = Vec::new();
        let mut offset = 0;
        for (idx, segment) in src.split(',').enumerate() {
            let tokens = tokenize(segment, offset)?;
            offset += segment.len() + 1;
            if tokens.is_empty() {
                return Err(ExpressionError::EmptySegment(idx));
            }
            let mut parser = Parser { tokens, pos: 0 };
            let node = parser.expr()?;
            if let Some((t, pos)) = parser.next() {
                return Err(ExpressionError::UnexpectedToken {
                    token: t.to_string(),
                    pos,
                });
            }
            outputs.push(node);
        }
        let mut labels = Vec::new();
        for node in &outputs {
            collect_labels(node, &mut labels);
        }
        if labels.is_empty() {
            return Err(ExpressionError::NoBands);
        }
        Ok(Self {
            source: src.to_string(),
            outputs,
            labels,
        })
    }

    /// Distinct band labels referenced, in order of first appearance.
    pub fn band_labels(&self) -> &[String] {
        &self.labels
    }

    /// Number of output bands (comma segments).
    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate every output band over same-shaped band samples keyed by label.
    pub fn evaluate(
        &self,
        bands: &HashMap<String, Array2<f64>>,
    ) -> Result<Vec<Array2<f64>>, ExpressionError> {
        let mut shape = None;
        for label in &self.labels {
            let arr = bands
                .get(label)
                .ok_or_else(|| ExpressionError::MissingBand(label.clone()))?;
            match shape {
                None => shape = Some(arr.dim()),
                Some(s) if s != arr.dim() => {
                    return Err(ExpressionError::ShapeMismatch {
                        expected: s,
                        got: arr.dim(),
                    });
                }
                Some(_) => {}
            }
        }
        let shape = shape.ok_or(ExpressionError::NoBands)?;

        let lookup = |label: &str| bands.get(label).map(|a| Value::View(a.view()));
        self.outputs
            .iter()
            .map(|node| {
                let mut out = match eval(node, &lookup)? {
                    Value::Scalar(v) => Array2::from_elem(shape, v),
                    Value::View(v) => v.to_owned(),
                    Value::Owned(a) => a,
                };
                nan_to_zero(&mut out);
                Ok(out)
            })
            .collect()
    }

    /// Evaluate every output band over single pixel values keyed by label.
    pub fn evaluate_point(&self, values: &HashMap<String, f64>) -> Result<Vec<f64>, ExpressionError> {
        let lookup = |label: &str| values.get(label).map(|v| Value::Scalar(*v));
        self.outputs
            .iter()
            .map(|node| match eval(node, &lookup)? {
                Value::Scalar(v) => Ok(finite_or_zero(v)),
                // Scalar inputs never produce arrays
                _ => Err(ExpressionError::NoBands),
            })
            .collect()
    }
}

impl FromStr for BandExpression {
    type Err = ExpressionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for BandExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

/// Stack band samples as output bands without an expression, in the given
/// order, optionally multiplied by a fixed factor.
pub fn pass_through(samples: Vec<Array2<f64>>, scale: Option<f64>) -> Vec<Array2<f64>> {
    match scale {
        Some(factor) => samples.into_iter().map(|s| s.mapv(|v| v * factor)).collect(),
        None => samples,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn bands(pairs: &[(&str, Array2<f64>)]) -> HashMap<String, Array2<f64>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn identity_expression_returns_band() {
        let b1 = array![[1.0, 2.5], [-3.0, 4.0]];
        let expr = BandExpression::parse("b1").unwrap();
        let out = expr.evaluate(&bands(&[("1", b1.clone())])).unwrap();
        assert_eq!(out, vec![b1]);
    }

    #[test]
    fn zero_over_zero_is_zero() {
        let b1 = array![[1.0, 7.0], [0.5, 1000.0]];
        let expr = BandExpression::parse("(b1-b1)/(b1+b1)").unwrap();
        let out = expr.evaluate(&bands(&[("1", b1)])).unwrap();
        assert!(out[0].iter().all(|&v| v == 0.0));

        let zeros = Array2::<f64>::zeros((2, 2));
        let expr = BandExpression::parse("(b5 - b4) / (b5 + b4)").unwrap();
        let out = expr
            .evaluate(&bands(&[("5", zeros.clone()), ("4", zeros)]))
            .unwrap();
        assert!(out[0].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn division_by_zero_is_zero() {
        let expr = BandExpression::parse("b1 / b2").unwrap();
        let out = expr
            .evaluate(&bands(&[("1", array![[3.0, -3.0]]), ("2", array![[0.0, 0.0]])]))
            .unwrap();
        assert_eq!(out[0], array![[0.0, 0.0]]);
    }

    #[test]
    fn normalized_difference() {
        let expr = BandExpression::parse("(b5 - b4) / (b5 + b4)").unwrap();
        let out = expr
            .evaluate(&bands(&[("5", array![[3.0, 1.0]]), ("4", array![[1.0, 3.0]])]))
            .unwrap();
        assert_eq!(out[0], array![[0.5, -0.5]]);
    }

    #[test]
    fn labels_are_deduplicated_in_first_use_order() {
        let expr = BandExpression::parse("b5*0.8, b4*1.1, b5-b4+b10").unwrap();
        assert_eq!(expr.band_labels(), ["5", "4", "10"]);
        assert_eq!(expr.output_count(), 3);
    }

    #[test]
    fn sentinel_labels() {
        let expr = BandExpression::parse("(b8A - b04) / (b8A + b04)").unwrap();
        assert_eq!(expr.band_labels(), ["8A", "04"]);
    }

    #[test]
    fn segments_evaluate_left_to_right() {
        let expr = BandExpression::parse("b1, b1*2, 3").unwrap();
        let out = expr.evaluate(&bands(&[("1", array![[1.0, 2.0]])])).unwrap();
        assert_eq!(out[0], array![[1.0, 2.0]]);
        assert_eq!(out[1], array![[2.0, 4.0]]);
        assert_eq!(out[2], array![[3.0, 3.0]]);
    }

    #[test]
    fn precedence_and_unary_minus() {
        let expr = BandExpression::parse("-b1 + b1 * 2 - (1 - 3) / 2").unwrap();
        let out = expr.evaluate(&bands(&[("1", array![[4.0]])])).unwrap();
        assert_eq!(out[0], array![[5.0]]);

        let expr = BandExpression::parse("2.5e1 * b1").unwrap();
        let out = expr.evaluate(&bands(&[("1", array![[2.0]])])).unwrap();
        assert_eq!(out[0], array![[50.0]]);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let expr = BandExpression::parse("(b2 - b1) / (b2 + b1)").unwrap();
        let input = bands(&[
            ("1", array![[0.1, 0.3], [0.0, 0.7]]),
            ("2", array![[0.4, 0.2], [0.0, 0.9]]),
        ]);
        let first = expr.evaluate(&input).unwrap();
        for _ in 0..5 {
            assert_eq!(expr.evaluate(&input).unwrap(), first);
        }
    }

    #[test]
    fn point_evaluation_with_zero_inputs() {
        let expr = BandExpression::parse("(b5 - b4) / (b5 + b4)").unwrap();
        let values: HashMap<String, f64> =
            [("5".to_string(), 0.0), ("4".to_string(), 0.0)].into_iter().collect();
        assert_eq!(expr.evaluate_point(&values).unwrap(), vec![0.0]);
    }

    #[test]
    fn parse_errors() {
        assert_eq!(BandExpression::parse("  "), Err(ExpressionError::Empty));
        assert_eq!(BandExpression::parse("b1+"), Err(ExpressionError::UnexpectedEnd));
        assert_eq!(BandExpression::parse("(b1"), Err(ExpressionError::UnexpectedEnd));
        assert_eq!(BandExpression::parse("b+1"), Err(ExpressionError::MissingBandLabel(0)));
        assert_eq!(BandExpression::parse("b1,,b2"), Err(ExpressionError::EmptySegment(1)));
        assert_eq!(BandExpression::parse("1 + 2"), Err(ExpressionError::NoBands));
        assert!(matches!(
            BandExpression::parse("b1 $ b2"),
            Err(ExpressionError::UnexpectedChar { ch: '$', pos: 3 })
        ));
        assert!(matches!(
            BandExpression::parse("b1 b2"),
            Err(ExpressionError::UnexpectedToken { .. })
        ));
    }

    #[test]
    fn missing_and_mismatched_bands() {
        let expr = BandExpression::parse("b1 + b2").unwrap();
        assert_eq!(
            expr.evaluate(&bands(&[("1", array![[1.0]])])),
            Err(ExpressionError::MissingBand("2".into()))
        );
        assert!(matches!(
            expr.evaluate(&bands(&[("1", array![[1.0]]), ("2", array![[1.0, 2.0]])])),
            Err(ExpressionError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn pass_through_scales() {
        let out = pass_through(vec![array![[1.0, 2.0]], array![[3.0, 0.0]]], Some(10.0));
        assert_eq!(out, vec![array![[10.0, 20.0]], array![[30.0, 0.0]]]);
        let out = pass_through(vec![array![[1.0]]], None);
        assert_eq!(out, vec![array![[1.0]]]);
    }
}
