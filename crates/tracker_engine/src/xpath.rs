//! A compact XPath 1.0 subset evaluated over a parsed `scraper::Html` tree.
//!
//! Supported: absolute and relative location paths, `//`, `.`, `..`,
//! the child, descendant, descendant-or-self, self, parent, ancestor,
//! following-sibling, preceding-sibling and attribute axes, name tests,
//! `*`, `text()`, `node()`, `@name`, `@*` and unions with `|`.
//!
//! Predicates accept positions (`[2]`, `[last()]`, `[position()=2]`),
//! attribute presence and comparison, `text()`, `.`, child-element and
//! `normalize-space(..)` comparisons, `contains(..)`, `starts-with(..)`,
//! `not(..)`, `and`, `or` and parentheses.
use std::collections::HashMap;

use ego_tree::{NodeId, NodeRef};
use scraper::node::Node;
use scraper::{ElementRef, Html};
use thiserror::Error;
use tracker_core::ExtractionKind;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid xpath '{expr}': {reason}")]
pub struct XPathError {
    pub expr: String,
    pub reason: String,
}

/// A parsed, reusable rule.
#[derive(Debug, Clone, PartialEq)]
pub struct XPath {
    source: String,
    branches: Vec<LocationPath>,
}

/// One item of a node-set.
#[derive(Debug, Clone, Copy)]
pub enum Selected<'a> {
    Node(NodeRef<'a, Node>),
    Attribute {
        owner: NodeRef<'a, Node>,
        index: usize,
        name: &'a str,
        value: &'a str,
    },
}

impl XPath {
    pub fn parse(expr: &str) -> Result<Self, XPathError> {
        let invalid = |reason: String| XPathError {
            expr: expr.to_string(),
            reason,
        };
        if expr.trim().is_empty() {
            return Err(invalid("empty expression".to_string()));
        }
        let tokens = tokenize(expr).map_err(invalid)?;
        let mut parser = Parser { tokens, pos: 0 };
        let branches = parser.parse_union().map_err(invalid)?;
        Ok(Self {
            source: expr.to_string(),
            branches,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Evaluate against the document, returning matches in document order.
    pub fn select<'a>(&self, document: &'a Html) -> Vec<Selected<'a>> {
        let order = DocumentOrder::new(document);
        let root = document.tree.root();
        let mut selected = Vec::new();
        for branch in &self.branches {
            let mut context = vec![Selected::Node(root)];
            for step in &branch.steps {
                context = evaluate_step(&context, step, &order);
                if context.is_empty() {
                    break;
                }
            }
            selected.extend(context);
        }
        order.normalize(selected)
    }

    /// Render every match for `kind` and join the non-empty pieces with a space.
    pub fn render(&self, document: &Html, kind: ExtractionKind) -> Option<String> {
        let parts: Vec<String> = self
            .select(document)
            .iter()
            .filter_map(|item| item.render(kind))
            .filter(|part| !part.is_empty())
            .collect();
        (!parts.is_empty()).then(|| parts.join(" "))
    }
}

impl<'a> Selected<'a> {
    /// XPath string-value: descendant text for nodes, the value for attributes.
    pub fn string_value(&self) -> String {
        match self {
            Selected::Node(node) => node_text(*node),
            Selected::Attribute { value, .. } => value.to_string(),
        }
    }

    fn render(&self, kind: ExtractionKind) -> Option<String> {
        match (self, kind) {
            (Selected::Attribute { value, .. }, _) => Some(value.trim().to_string()),
            (Selected::Node(node), ExtractionKind::Text) => Some(node_text(*node).trim().to_string()),
            (Selected::Node(node), ExtractionKind::Markup) => outer_html(*node),
        }
    }
}

fn node_text(node: NodeRef<'_, Node>) -> String {
    node.descendants()
        .filter_map(|n| n.value().as_text().map(|text| &**text))
        .collect()
}

fn outer_html(node: NodeRef<'_, Node>) -> Option<String> {
    match node.value() {
        Node::Element(_) => ElementRef::wrap(node).map(|element| element.html()),
        Node::Text(text) => Some(text.trim().to_string()),
        Node::Document | Node::Fragment => node
            .children()
            .find_map(ElementRef::wrap)
            .map(|element| element.html()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Syntax tree

#[derive(Debug, Clone, PartialEq)]
struct LocationPath {
    steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq)]
struct Step {
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Predicate>,
}

impl Step {
    fn new(axis: Axis, test: NodeTest) -> Self {
        Self {
            axis,
            test,
            predicates: Vec::new(),
        }
    }

    /// The implicit step behind `//`.
    fn descendant_or_self() -> Self {
        Self::new(Axis::DescendantOrSelf, NodeTest::AnyNode)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    SelfNode,
    Parent,
    Ancestor,
    FollowingSibling,
    PrecedingSibling,
    Attribute,
}

impl Axis {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "child" => Axis::Child,
            "descendant" => Axis::Descendant,
            "descendant-or-self" => Axis::DescendantOrSelf,
            "self" => Axis::SelfNode,
            "parent" => Axis::Parent,
            "ancestor" => Axis::Ancestor,
            "following-sibling" => Axis::FollowingSibling,
            "preceding-sibling" => Axis::PrecedingSibling,
            "attribute" => Axis::Attribute,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum NodeTest {
    /// Lowercased element or attribute name.
    Name(String),
    /// `*`: any element, or any attribute on the attribute axis.
    Any,
    Text,
    AnyNode,
}

impl NodeTest {
    fn matches_node(&self, node: &Node) -> bool {
        match self {
            NodeTest::AnyNode => true,
            NodeTest::Text => node.is_text(),
            NodeTest::Any => node.is_element(),
            NodeTest::Name(name) => node
                .as_element()
                .is_some_and(|element| element.name().eq_ignore_ascii_case(name)),
        }
    }

    fn matches_attribute(&self, attribute: &str) -> bool {
        match self {
            NodeTest::Any | NodeTest::AnyNode => true,
            NodeTest::Name(name) => attribute.eq_ignore_ascii_case(name),
            NodeTest::Text => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    Position(usize),
    Last,
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Exists(Operand),
    Compare {
        operand: Operand,
        negate: bool,
        literal: String,
    },
    Contains(Operand, String),
    StartsWith(Operand, String),
    PositionEq(usize),
    IsLast,
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Attribute(String),
    Text,
    StringValue,
    Child(String),
    Normalized(Box<Operand>),
}

// ---------------------------------------------------------------------------
// Tokenizer

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Slash,
    DoubleSlash,
    LBracket,
    RBracket,
    LParen,
    RParen,
    At,
    Star,
    Dot,
    DotDot,
    Pipe,
    Eq,
    NotEq,
    Comma,
    Axis(String),
    Literal(String),
    Number(usize),
    Name(String),
}

fn tokenize(expr: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = expr.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let simple = match c {
            '[' => Some(Token::LBracket),
            ']' => Some(Token::RBracket),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '@' => Some(Token::At),
            '*' => Some(Token::Star),
            '|' => Some(Token::Pipe),
            '=' => Some(Token::Eq),
            ',' => Some(Token::Comma),
            _ => None,
        };
        if let Some(token) = simple {
            tokens.push(token);
            i += 1;
            continue;
        }
        match c {
            c if c.is_whitespace() => i += 1,
            '/' => {
                if chars.get(i + 1) == Some(&'/') {
                    tokens.push(Token::DoubleSlash);
                    i += 2;
                } else {
                    tokens.push(Token::Slash);
                    i += 1;
                }
            }
            '.' => {
                if chars.get(i + 1) == Some(&'.') {
                    tokens.push(Token::DotDot);
                    i += 2;
                } else {
                    tokens.push(Token::Dot);
                    i += 1;
                }
            }
            '!' => {
                if chars.get(i + 1) != Some(&'=') {
                    return Err(format!("unexpected '!' at offset {i}"));
                }
                tokens.push(Token::NotEq);
                i += 2;
            }
            '\'' | '"' => {
                let start = i + 1;
                let end = chars[start..]
                    .iter()
                    .position(|&ch| ch == c)
                    .map(|offset| start + offset)
                    .ok_or_else(|| format!("unterminated string literal at offset {i}"))?;
                tokens.push(Token::Literal(chars[start..end].iter().collect()));
                i = end + 1;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let digits: String = chars[start..i].iter().collect();
                let number = digits
                    .parse::<usize>()
                    .map_err(|err| format!("bad number '{digits}': {err}"))?;
                tokens.push(Token::Number(number));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '-' | '_' | '.'))
                {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect();
                if chars.get(i) == Some(&':') && chars.get(i + 1) == Some(&':') {
                    tokens.push(Token::Axis(name));
                    i += 2;
                } else {
                    tokens.push(Token::Name(name));
                }
            }
            other => return Err(format!("unexpected character '{other}' at offset {i}")),
        }
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token) -> Result<(), String> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(format!("expected {token:?}, found {}", describe(self.peek())))
        }
    }

    fn is_call(&self, name: &str) -> bool {
        matches!(self.peek(), Some(Token::Name(n)) if n == name)
            && self.peek_at(1) == Some(&Token::LParen)
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Some(Token::Name(n)) if n == keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_union(&mut self) -> Result<Vec<LocationPath>, String> {
        let mut branches = vec![self.parse_path()?];
        while self.eat(&Token::Pipe) {
            branches.push(self.parse_path()?);
        }
        match self.peek() {
            None => Ok(branches),
            Some(token) => Err(format!("unexpected {token:?}")),
        }
    }

    fn parse_path(&mut self) -> Result<LocationPath, String> {
        let mut steps = Vec::new();
        match self.peek() {
            Some(Token::Slash) => {
                self.pos += 1;
                if !self.starts_step() {
                    return Ok(LocationPath { steps });
                }
            }
            Some(Token::DoubleSlash) => {
                self.pos += 1;
                steps.push(Step::descendant_or_self());
            }
            _ => {}
        }
        steps.push(self.parse_step()?);
        loop {
            match self.peek() {
                Some(Token::Slash) => {
                    self.pos += 1;
                }
                Some(Token::DoubleSlash) => {
                    self.pos += 1;
                    steps.push(Step::descendant_or_self());
                }
                _ => break,
            }
            steps.push(self.parse_step()?);
        }
        Ok(LocationPath { steps })
    }

    fn starts_step(&self) -> bool {
        matches!(
            self.peek(),
            Some(Token::Name(_) | Token::Axis(_) | Token::At | Token::Star | Token::Dot | Token::DotDot)
        )
    }

    fn parse_step(&mut self) -> Result<Step, String> {
        if self.eat(&Token::Dot) {
            return Ok(Step::new(Axis::SelfNode, NodeTest::AnyNode));
        }
        if self.eat(&Token::DotDot) {
            return Ok(Step::new(Axis::Parent, NodeTest::AnyNode));
        }
        let axis = match self.peek().cloned() {
            Some(Token::At) => {
                self.pos += 1;
                Axis::Attribute
            }
            Some(Token::Axis(name)) => {
                self.pos += 1;
                Axis::from_name(&name).ok_or_else(|| format!("unsupported axis '{name}'"))?
            }
            _ => Axis::Child,
        };
        let mut step = Step::new(axis, self.parse_node_test()?);
        while self.eat(&Token::LBracket) {
            step.predicates.push(self.parse_predicate()?);
            self.expect(Token::RBracket)?;
        }
        Ok(step)
    }

    fn parse_node_test(&mut self) -> Result<NodeTest, String> {
        match self.next() {
            Some(Token::Star) => Ok(NodeTest::Any),
            Some(Token::Name(name)) => {
                if self.eat(&Token::LParen) {
                    self.expect(Token::RParen)?;
                    return match name.as_str() {
                        "text" => Ok(NodeTest::Text),
                        "node" => Ok(NodeTest::AnyNode),
                        other => Err(format!("unsupported node test '{other}()'")),
                    };
                }
                Ok(NodeTest::Name(name.to_ascii_lowercase()))
            }
            other => Err(format!("expected node test, found {}", describe(other.as_ref()))),
        }
    }

    fn parse_predicate(&mut self) -> Result<Predicate, String> {
        let lookahead = (self.peek().cloned(), self.peek_at(1).cloned());
        if let (Some(Token::Number(n)), Some(Token::RBracket)) = lookahead {
            self.pos += 1;
            return Ok(Predicate::Position(n));
        }
        if self.is_call("last") && self.peek_at(3) == Some(&Token::RBracket) {
            self.pos += 3;
            return Ok(Predicate::Last);
        }
        Ok(Predicate::Expr(self.parse_or()?))
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_and()?;
        while self.eat_keyword("or") {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_unary()?;
        while self.eat_keyword("and") {
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        if self.eat(&Token::LParen) {
            let inner = self.parse_or()?;
            self.expect(Token::RParen)?;
            return Ok(inner);
        }
        if self.is_call("not") {
            self.pos += 2;
            let inner = self.parse_or()?;
            self.expect(Token::RParen)?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        if self.is_call("contains") || self.is_call("starts-with") {
            let starts_with = self.is_call("starts-with");
            self.pos += 2;
            let operand = self.parse_operand()?;
            self.expect(Token::Comma)?;
            let literal = self.parse_literal()?;
            self.expect(Token::RParen)?;
            return Ok(if starts_with {
                Expr::StartsWith(operand, literal)
            } else {
                Expr::Contains(operand, literal)
            });
        }
        if self.is_call("position") {
            self.pos += 2;
            self.expect(Token::RParen)?;
            self.expect(Token::Eq)?;
            return match self.next() {
                Some(Token::Number(n)) => Ok(Expr::PositionEq(n)),
                other => Err(format!("expected number, found {}", describe(other.as_ref()))),
            };
        }
        if self.is_call("last") {
            self.pos += 2;
            self.expect(Token::RParen)?;
            return Ok(Expr::IsLast);
        }

        let operand = self.parse_operand()?;
        let negate = match self.peek() {
            Some(Token::Eq) => false,
            Some(Token::NotEq) => true,
            _ => return Ok(Expr::Exists(operand)),
        };
        self.pos += 1;
        let literal = self.parse_literal()?;
        Ok(Expr::Compare {
            operand,
            negate,
            literal,
        })
    }

    fn parse_literal(&mut self) -> Result<String, String> {
        match self.next() {
            Some(Token::Literal(value)) => Ok(value),
            Some(Token::Number(n)) => Ok(n.to_string()),
            other => Err(format!("expected literal, found {}", describe(other.as_ref()))),
        }
    }

    fn parse_operand(&mut self) -> Result<Operand, String> {
        if self.is_call("text") {
            self.pos += 2;
            self.expect(Token::RParen)?;
            return Ok(Operand::Text);
        }
        if self.is_call("normalize-space") || self.is_call("string") {
            let normalize = self.is_call("normalize-space");
            self.pos += 2;
            let inner = if self.eat(&Token::RParen) {
                Operand::StringValue
            } else {
                let operand = self.parse_operand()?;
                self.expect(Token::RParen)?;
                operand
            };
            return Ok(if normalize {
                Operand::Normalized(Box::new(inner))
            } else {
                inner
            });
        }
        match self.next() {
            Some(Token::At) => match self.next() {
                Some(Token::Name(name)) => Ok(Operand::Attribute(name.to_ascii_lowercase())),
                other => Err(format!(
                    "expected attribute name, found {}",
                    describe(other.as_ref())
                )),
            },
            Some(Token::Dot) => Ok(Operand::StringValue),
            Some(Token::Name(name)) => Ok(Operand::Child(name.to_ascii_lowercase())),
            other => Err(format!("expected operand, found {}", describe(other.as_ref()))),
        }
    }
}

fn describe(token: Option<&Token>) -> String {
    match token {
        Some(token) => format!("{token:?}"),
        None => "end of expression".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Evaluation

struct DocumentOrder {
    index: HashMap<NodeId, usize>,
}

impl DocumentOrder {
    fn new(document: &Html) -> Self {
        let index = document
            .tree
            .root()
            .descendants()
            .enumerate()
            .map(|(position, node)| (node.id(), position))
            .collect();
        Self { index }
    }

    fn key(&self, item: &Selected<'_>) -> (usize, usize) {
        match item {
            Selected::Node(node) => (self.position(*node), 0),
            Selected::Attribute { owner, index, .. } => (self.position(*owner), index + 1),
        }
    }

    fn position(&self, node: NodeRef<'_, Node>) -> usize {
        self.index.get(&node.id()).copied().unwrap_or(usize::MAX)
    }

    fn normalize<'a>(&self, mut items: Vec<Selected<'a>>) -> Vec<Selected<'a>> {
        items.sort_by_key(|item| self.key(item));
        items.dedup_by_key(|item| self.key(item));
        items
    }
}

fn evaluate_step<'a>(
    context: &[Selected<'a>],
    step: &Step,
    order: &DocumentOrder,
) -> Vec<Selected<'a>> {
    let mut out = Vec::new();
    for item in context {
        let Selected::Node(node) = item else {
            continue;
        };
        let mut candidates = axis_candidates(*node, step);
        for predicate in &step.predicates {
            candidates = apply_predicate(candidates, predicate);
        }
        out.extend(candidates);
    }
    order.normalize(out)
}

fn axis_candidates<'a>(node: NodeRef<'a, Node>, step: &Step) -> Vec<Selected<'a>> {
    if step.axis == Axis::Attribute {
        let Node::Element(element) = node.value() else {
            return Vec::new();
        };
        return element
            .attrs()
            .enumerate()
            .filter(|(_, (name, _))| step.test.matches_attribute(name))
            .map(|(index, (name, value))| Selected::Attribute {
                owner: node,
                index,
                name,
                value,
            })
            .collect();
    }

    let nodes: Box<dyn Iterator<Item = NodeRef<'a, Node>> + 'a> = match step.axis {
        Axis::Child => Box::new(node.children()),
        Axis::Descendant => Box::new(node.descendants().skip(1)),
        Axis::DescendantOrSelf => Box::new(node.descendants()),
        Axis::SelfNode => Box::new(std::iter::once(node)),
        Axis::Parent => Box::new(node.parent().into_iter()),
        Axis::Ancestor => Box::new(node.ancestors()),
        Axis::FollowingSibling => Box::new(node.next_siblings()),
        Axis::PrecedingSibling => Box::new(node.prev_siblings()),
        Axis::Attribute => Box::new(std::iter::empty()),
    };
    nodes
        .filter(|candidate| step.test.matches_node(candidate.value()))
        .map(Selected::Node)
        .collect()
}

fn apply_predicate<'a>(candidates: Vec<Selected<'a>>, predicate: &Predicate) -> Vec<Selected<'a>> {
    let size = candidates.len();
    candidates
        .into_iter()
        .enumerate()
        .filter(|(index, item)| {
            let position = index + 1;
            match predicate {
                Predicate::Position(n) => position == *n,
                Predicate::Last => position == size,
                Predicate::Expr(expr) => expr.holds(item, position, size),
            }
        })
        .map(|(_, item)| item)
        .collect()
}

impl Expr {
    fn holds(&self, item: &Selected<'_>, position: usize, size: usize) -> bool {
        match self {
            Expr::Or(left, right) => {
                left.holds(item, position, size) || right.holds(item, position, size)
            }
            Expr::And(left, right) => {
                left.holds(item, position, size) && right.holds(item, position, size)
            }
            Expr::Not(inner) => !inner.holds(item, position, size),
            Expr::Exists(operand) => !operand.values(item).is_empty(),
            Expr::Compare {
                operand,
                negate,
                literal,
            } => operand
                .values(item)
                .iter()
                .any(|value| (value == literal) != *negate),
            Expr::Contains(operand, needle) => operand
                .values(item)
                .iter()
                .any(|value| value.contains(needle.as_str())),
            Expr::StartsWith(operand, prefix) => operand
                .values(item)
                .iter()
                .any(|value| value.starts_with(prefix.as_str())),
            Expr::PositionEq(n) => position == *n,
            Expr::IsLast => position == size,
        }
    }
}

impl Operand {
    /// Node-set semantics: a comparison holds if any value satisfies it.
    fn values(&self, item: &Selected<'_>) -> Vec<String> {
        match (self, item) {
            (Operand::Normalized(inner), _) => inner
                .values(item)
                .iter()
                .map(|value| normalize_space(value))
                .collect(),
            (Operand::StringValue, _) => vec![item.string_value()],
            (Operand::Attribute(name), Selected::Node(node)) => node
                .value()
                .as_element()
                .and_then(|element| element.attr(name))
                .map(|value| vec![value.to_string()])
                .unwrap_or_default(),
            (Operand::Text, Selected::Node(node)) => node
                .children()
                .filter_map(|child| child.value().as_text().map(|text| String::from(&**text)))
                .collect(),
            (Operand::Child(name), Selected::Node(node)) => node
                .children()
                .filter(|child| {
                    child
                        .value()
                        .as_element()
                        .is_some_and(|element| element.name().eq_ignore_ascii_case(name))
                })
                .map(node_text)
                .collect(),
            _ => Vec::new(),
        }
    }
}

fn normalize_space(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}
