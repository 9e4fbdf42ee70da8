//! The Rego parser.
//!
//! Recursive descent over the token stream, producing AST₀ (the shape the
//! `wf_parse` table describes). Operator precedence, tightest first:
//! postfix refs and calls, unary minus, `* / %`, `+ -`, comparisons,
//! `&`, `|`, `in`, and finally `:=`/`=`. Collection literals parse their
//! elements below the `|` level so a leading `expr |` inside brackets
//! reads as a comprehension, never a union; parenthesize to get a union
//! element.

use std::sync::Arc;

use crate::ast::{Ast, Kind, NodeId};
use crate::errors::{ErrorCode, PolicyError};
use crate::location::{Location, Source};

use super::lexer::{Lexer, Token, TokenKind};

pub struct Parser<'a> {
    ast: &'a mut Ast,
    source: Arc<Source>,
    tokens: Vec<Token>,
    pos: usize,
}

type ParseResult<T> = Result<T, PolicyError>;

impl<'a> Parser<'a> {
    fn new(ast: &'a mut Ast, source: Arc<Source>) -> ParseResult<Self> {
        let tokens = Lexer::new(source.clone()).tokenize()?;
        Ok(Self {
            ast,
            source,
            tokens,
            pos: 0,
        })
    }

    /// Parses a module: package clause, imports, rules.
    pub fn parse_module(ast: &'a mut Ast, source: Arc<Source>) -> ParseResult<NodeId> {
        let mut parser = Self::new(ast, source)?;
        let loc = parser.here();

        parser.expect_keyword("package")?;
        let package_ref = parser.parse_ref_path()?;
        let package = parser.ast.node(Kind::Package, loc.clone());
        parser.ast.push_child(package, package_ref);

        let imports = parser.ast.node(Kind::ImportSeq, loc.clone());
        while parser.at_keyword("import") {
            let import = parser.parse_import()?;
            parser.ast.push_child(imports, import);
        }

        let policy = parser.ast.node(Kind::Policy, loc.clone());
        while parser.peek().kind != TokenKind::Eof {
            let rule = parser.parse_rule()?;
            parser.ast.push_child(policy, rule);
        }

        let module = parser.ast.node(Kind::Module, loc);
        parser.ast.push_child(module, package);
        parser.ast.push_child(module, imports);
        parser.ast.push_child(module, policy);
        Ok(module)
    }

    /// Parses an ad-hoc query: literals separated by `;` or newlines.
    pub fn parse_query(ast: &'a mut Ast, source: Arc<Source>) -> ParseResult<NodeId> {
        let mut parser = Self::new(ast, source)?;
        let loc = parser.here();
        let body = parser.ast.node(Kind::UnifyBody, loc.clone());
        loop {
            if parser.peek().kind == TokenKind::Eof {
                break;
            }
            let literal = parser.parse_literal()?;
            parser.ast.push_child(body, literal);
            if parser.peek().kind == TokenKind::Semicolon {
                parser.advance();
            }
        }
        if parser.ast.size(body) == 0 {
            return Err(parser.error_here("empty query"));
        }
        let query = parser.ast.node(Kind::Query, loc);
        parser.ast.push_child(query, body);
        Ok(query)
    }

    /// Parses a single term expression (used for term-form input).
    pub fn parse_term_expr(ast: &'a mut Ast, source: Arc<Source>) -> ParseResult<NodeId> {
        let mut parser = Self::new(ast, source)?;
        let expr = parser.parse_expr()?;
        if parser.peek().kind != TokenKind::Eof {
            return Err(parser.error_here("trailing tokens after term"));
        }
        Ok(expr)
    }

    // --- token plumbing ---------------------------------------------------

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let index = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[index]
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn here(&self) -> Location {
        self.peek().location(&self.source)
    }

    fn prev_line(&self) -> usize {
        if self.pos == 0 {
            return 1;
        }
        self.tokens[self.pos - 1].line
    }

    fn error_here(&self, message: impl Into<String>) -> PolicyError {
        PolicyError::at(ErrorCode::ParseError, message, &self.here())
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> ParseResult<Token> {
        if self.peek().kind == kind {
            Ok(self.advance())
        } else {
            Err(self.error_here(format!("expected {what}")))
        }
    }

    fn at_keyword(&self, word: &str) -> bool {
        self.peek().kind == TokenKind::Ident && self.peek().text == word
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if self.at_keyword(word) {
            self.advance();
            return true;
        }
        false
    }

    fn expect_keyword(&mut self, word: &str) -> ParseResult<()> {
        if self.eat_keyword(word) {
            Ok(())
        } else {
            Err(self.error_here(format!("expected `{word}`")))
        }
    }

    // --- node helpers -----------------------------------------------------

    fn leaf(&mut self, kind: Kind, token: &Token) -> NodeId {
        let loc = token.location(&self.source);
        self.ast.node_with_text(kind, loc, token.text.clone())
    }

    fn wrap(&mut self, kind: Kind, child: NodeId) -> NodeId {
        let loc = self.ast.loc(child).clone();
        let node = self.ast.node(kind, loc);
        self.ast.push_child(node, child);
        node
    }

    fn wrap_expr(&mut self, inner: NodeId) -> NodeId {
        self.wrap(Kind::Expr, inner)
    }

    fn scalar_expr(&mut self, kind: Kind, token: &Token) -> NodeId {
        let leaf = self.leaf(kind, token);
        let scalar = self.wrap(Kind::Scalar, leaf);
        let term = self.wrap(Kind::Term, scalar);
        self.wrap_expr(term)
    }

    fn var_term_expr(&mut self, var: NodeId) -> NodeId {
        let term = self.wrap(Kind::Term, var);
        self.wrap_expr(term)
    }

    fn true_expr(&mut self, loc: &Location) -> NodeId {
        let leaf = self.ast.node_with_text(Kind::True, loc.clone(), "true");
        let scalar = self.wrap(Kind::Scalar, leaf);
        let term = self.wrap(Kind::Term, scalar);
        self.wrap_expr(term)
    }

    // --- imports and rules ------------------------------------------------

    /// `import ref [as alias]`; the node text is the binding name.
    fn parse_import(&mut self) -> ParseResult<NodeId> {
        let loc = self.here();
        self.expect_keyword("import")?;
        let target = self.parse_ref_path()?;
        let alias = if self.eat_keyword("as") {
            self.expect(TokenKind::Ident, "import alias")?.text
        } else {
            // default binding: the last path segment
            let argseq = self.ast.child(target, 1);
            let last = self
                .ast
                .children(argseq)
                .last()
                .map(|&arg| self.ast.text(self.ast.child(arg, 0)).to_owned());
            match last {
                Some(name) => name,
                None => {
                    let head = self.ast.child(self.ast.child(target, 0), 0);
                    self.ast.text(head).to_owned()
                }
            }
        };
        let import = self.ast.node_with_text(Kind::Import, loc, alias);
        self.ast.push_child(import, target);
        Ok(import)
    }

    /// A dotted path as a `Ref` (package paths, import targets, `with`
    /// targets).
    fn parse_ref_path(&mut self) -> ParseResult<NodeId> {
        let loc = self.here();
        let head_token = self.expect(TokenKind::Ident, "identifier")?;
        let head_var = self.leaf(Kind::Var, &head_token);
        let head = self.wrap(Kind::RefHead, head_var);
        let argseq = self.ast.node(Kind::RefArgSeq, loc.clone());
        loop {
            if self.peek().kind == TokenKind::Dot {
                self.advance();
                let seg = self.expect(TokenKind::Ident, "identifier after `.`")?;
                let var = self.leaf(Kind::Var, &seg);
                let arg = self.wrap(Kind::RefArgDot, var);
                self.ast.push_child(argseq, arg);
            } else if self.peek().kind == TokenKind::LBrack && self.peek_at(1).kind == TokenKind::String {
                self.advance();
                let seg = self.advance();
                let string = self.leaf(Kind::JSONString, &seg);
                let scalar = self.wrap(Kind::Scalar, string);
                let term = self.wrap(Kind::Term, scalar);
                let expr = self.wrap_expr(term);
                let arg = self.wrap(Kind::RefArgBrack, expr);
                self.expect(TokenKind::RBrack, "`]`")?;
                self.ast.push_child(argseq, arg);
            } else {
                break;
            }
        }
        let reference = self.ast.node(Kind::Ref, loc);
        self.ast.push_child(reference, head);
        self.ast.push_child(reference, argseq);
        Ok(reference)
    }

    /// The dotted name of a rule, e.g. `a.b.c`.
    fn parse_rule_ref(&mut self) -> ParseResult<NodeId> {
        let loc = self.here();
        let rule_ref = self.ast.node(Kind::RuleRef, loc);
        let first = self.expect(TokenKind::Ident, "rule name")?;
        let var = self.leaf(Kind::Var, &first);
        self.ast.push_child(rule_ref, var);
        while self.peek().kind == TokenKind::Dot {
            // `name[...]` is a key, not a path segment, and stops the path
            self.advance();
            let seg = self.expect(TokenKind::Ident, "identifier after `.`")?;
            let var = self.leaf(Kind::Var, &seg);
            self.ast.push_child(rule_ref, var);
        }
        Ok(rule_ref)
    }

    fn parse_rule(&mut self) -> ParseResult<NodeId> {
        let loc = self.here();

        if self.eat_keyword("default") {
            let rule_ref = self.parse_rule_ref()?;
            if self.peek().kind == TokenKind::Assign || self.peek().kind == TokenKind::Unify {
                self.advance();
            } else {
                return Err(self.error_here("expected `:=` after default rule name"));
            }
            let value = self.parse_expr()?;
            let rule = self.ast.node(Kind::DefaultRule, loc);
            self.ast.push_child(rule, rule_ref);
            self.ast.push_child(rule, value);
            return Ok(rule);
        }

        let rule_ref = self.parse_rule_ref()?;

        // classify the head
        let head_inner = if self.peek().kind == TokenKind::LParen {
            self.parse_func_head(&loc)?
        } else if self.at_keyword("contains") {
            self.advance();
            let item = self.parse_expr()?;
            let head = self.ast.node(Kind::RuleHeadSet, loc.clone());
            self.ast.push_child(head, item);
            head
        } else if self.peek().kind == TokenKind::LBrack {
            self.advance();
            let key = self.parse_expr()?;
            self.expect(TokenKind::RBrack, "`]`")?;
            if self.peek().kind == TokenKind::Assign || self.peek().kind == TokenKind::Unify {
                self.advance();
                let value = self.parse_expr()?;
                let head = self.ast.node(Kind::RuleHeadObj, loc.clone());
                self.ast.push_child(head, key);
                self.ast.push_child(head, value);
                head
            } else {
                // `p[x] { ... }`: a partial set in the older style
                let head = self.ast.node(Kind::RuleHeadSet, loc.clone());
                self.ast.push_child(head, key);
                head
            }
        } else if self.peek().kind == TokenKind::Assign || self.peek().kind == TokenKind::Unify {
            self.advance();
            let value = self.parse_expr()?;
            let head = self.ast.node(Kind::RuleHeadComp, loc.clone());
            self.ast.push_child(head, value);
            head
        } else if self.at_keyword("if") || self.peek().kind == TokenKind::LBrace {
            let value = self.true_expr(&loc);
            let head = self.ast.node(Kind::RuleHeadComp, loc.clone());
            self.ast.push_child(head, value);
            head
        } else {
            return Err(self.error_here("expected rule value or body"));
        };

        let head = self.ast.node(Kind::RuleHead, loc.clone());
        self.ast.push_child(head, head_inner);

        // first body, then else chain
        let bodies = self.ast.node(Kind::RuleBodySeq, loc.clone());
        let first_body = self.ast.node(Kind::RuleBody, loc.clone());
        if let Some(body) = self.parse_optional_body()? {
            self.ast.push_child(first_body, body);
        }
        self.ast.push_child(bodies, first_body);

        while self.at_keyword("else") {
            let else_loc = self.here();
            self.advance();
            let else_node = self.ast.node(Kind::Else, else_loc);
            if self.peek().kind == TokenKind::Assign || self.peek().kind == TokenKind::Unify {
                self.advance();
                let value = self.parse_expr()?;
                self.ast.push_child(else_node, value);
            }
            if let Some(body) = self.parse_optional_body()? {
                self.ast.push_child(else_node, body);
            }
            self.ast.push_child(bodies, else_node);
        }

        let rule = self.ast.node(Kind::Rule, loc);
        self.ast.push_child(rule, rule_ref);
        self.ast.push_child(rule, head);
        self.ast.push_child(rule, bodies);
        Ok(rule)
    }

    fn parse_func_head(&mut self, loc: &Location) -> ParseResult<NodeId> {
        self.expect(TokenKind::LParen, "`(`")?;
        let args = self.ast.node(Kind::RuleArgs, loc.clone());
        if self.peek().kind != TokenKind::RParen {
            loop {
                let arg = self.parse_expr()?;
                // parameters are vars or constant terms
                let inner = self.ast.child(arg, 0);
                let param = if self.ast.kind(inner) == Kind::Term && self.ast.kind(self.ast.child(inner, 0)) == Kind::Var
                {
                    self.ast.detach(self.ast.child(inner, 0))
                } else {
                    self.ast.detach(inner)
                };
                self.ast.push_child(args, param);
                if self.peek().kind == TokenKind::Comma {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "`)`")?;

        let value = if self.peek().kind == TokenKind::Assign || self.peek().kind == TokenKind::Unify {
            self.advance();
            self.parse_expr()?
        } else {
            self.true_expr(loc)
        };
        let head = self.ast.node(Kind::RuleHeadFunc, loc.clone());
        self.ast.push_child(head, args);
        self.ast.push_child(head, value);
        Ok(head)
    }

    /// `if <literal>`, `if { ... }`, `{ ... }`, or nothing.
    fn parse_optional_body(&mut self) -> ParseResult<Option<NodeId>> {
        if self.eat_keyword("if") {
            if self.peek().kind == TokenKind::LBrace {
                return Ok(Some(self.parse_body()?));
            }
            let loc = self.here();
            let literal = self.parse_literal()?;
            let body = self.ast.node(Kind::UnifyBody, loc);
            self.ast.push_child(body, literal);
            return Ok(Some(body));
        }
        if self.peek().kind == TokenKind::LBrace {
            return Ok(Some(self.parse_body()?));
        }
        Ok(None)
    }

    fn parse_body(&mut self) -> ParseResult<NodeId> {
        let loc = self.here();
        self.expect(TokenKind::LBrace, "`{`")?;
        let body = self.ast.node(Kind::UnifyBody, loc);
        loop {
            if self.peek().kind == TokenKind::RBrace {
                break;
            }
            let before_line = self.prev_line();
            if self.ast.size(body) > 0 {
                // literals separate by `;` or a line break
                if self.peek().kind == TokenKind::Semicolon {
                    self.advance();
                } else if self.peek().line == before_line {
                    return Err(self.error_here("expected `;` or newline between literals"));
                }
            }
            if self.peek().kind == TokenKind::RBrace {
                break;
            }
            let literal = self.parse_literal()?;
            self.ast.push_child(body, literal);
        }
        self.expect(TokenKind::RBrace, "`}`")?;
        if self.ast.size(body) == 0 {
            return Err(self.error_here("empty rule body"));
        }
        Ok(body)
    }

    fn parse_literal(&mut self) -> ParseResult<NodeId> {
        let loc = self.here();
        if self.at_keyword("every") {
            return Err(PolicyError::at(
                ErrorCode::CompileError,
                "the `every` keyword is not supported",
                &loc,
            ));
        }

        let inner = if self.at_keyword("some") {
            self.advance();
            self.parse_some_decl(&loc)?
        } else if self.at_keyword("not") {
            self.advance();
            let expr = self.parse_expr()?;
            let not = self.ast.node(Kind::NotExpr, loc.clone());
            self.ast.push_child(not, expr);
            not
        } else {
            self.parse_expr()?
        };

        let literal = self.ast.node(Kind::Literal, loc.clone());
        self.ast.push_child(literal, inner);

        if self.at_keyword("with") {
            let with_seq = self.ast.node(Kind::WithSeq, loc);
            while self.eat_keyword("with") {
                let with_loc = self.here();
                let target = self.parse_ref_path()?;
                self.expect_keyword("as")?;
                let value = self.parse_expr()?;
                let with = self.ast.node(Kind::With, with_loc);
                self.ast.push_child(with, target);
                self.ast.push_child(with, value);
                self.ast.push_child(with_seq, with);
            }
            self.ast.push_child(literal, with_seq);
        }
        Ok(literal)
    }

    /// `some x`, `some x, y`, `some x in S`, `some k, v in S`.
    fn parse_some_decl(&mut self, loc: &Location) -> ParseResult<NodeId> {
        let vars = self.ast.node(Kind::VarSeq, loc.clone());
        loop {
            let token = self.expect(TokenKind::Ident, "variable after `some`")?;
            let var = self.leaf(Kind::Var, &token);
            self.ast.push_child(vars, var);
            if self.peek().kind == TokenKind::Comma {
                self.advance();
            } else {
                break;
            }
        }
        let decl = self.ast.node(Kind::SomeDecl, loc.clone());
        self.ast.push_child(decl, vars);
        if self.eat_keyword("in") {
            let collection = self.parse_no_assign()?;
            self.ast.push_child(decl, collection);
        }
        Ok(decl)
    }

    // --- expressions ------------------------------------------------------

    fn infix(&mut self, lhs: NodeId, op_kind: Kind, op_token: &Token, rhs: NodeId) -> NodeId {
        let op = self.leaf(op_kind, op_token);
        let loc = self.ast.loc(lhs).clone();
        let infix = self.ast.node(Kind::Infix, loc);
        self.ast.push_child(infix, lhs);
        self.ast.push_child(infix, op);
        self.ast.push_child(infix, rhs);
        self.wrap_expr(infix)
    }

    fn parse_expr(&mut self) -> ParseResult<NodeId> {
        let lhs = self.parse_no_assign()?;
        let kind = match self.peek().kind {
            TokenKind::Assign => Kind::Assign,
            TokenKind::Unify => Kind::Unify,
            _ => return Ok(lhs),
        };
        let token = self.advance();
        let rhs = self.parse_no_assign()?;
        Ok(self.infix(lhs, kind, &token, rhs))
    }

    fn parse_no_assign(&mut self) -> ParseResult<NodeId> {
        self.parse_in_expr()
    }

    fn parse_in_expr(&mut self) -> ParseResult<NodeId> {
        let mut lhs = self.parse_union()?;
        while self.at_keyword("in") {
            let token = self.advance();
            let rhs = self.parse_union()?;
            lhs = self.infix(lhs, Kind::InOp, &token, rhs);
        }
        Ok(lhs)
    }

    fn parse_union(&mut self) -> ParseResult<NodeId> {
        let mut lhs = self.parse_intersection()?;
        while self.peek().kind == TokenKind::Pipe {
            let token = self.advance();
            let rhs = self.parse_intersection()?;
            lhs = self.infix(lhs, Kind::Or, &token, rhs);
        }
        Ok(lhs)
    }

    fn parse_intersection(&mut self) -> ParseResult<NodeId> {
        let mut lhs = self.parse_comparison()?;
        while self.peek().kind == TokenKind::Amp {
            let token = self.advance();
            let rhs = self.parse_comparison()?;
            lhs = self.infix(lhs, Kind::And, &token, rhs);
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> ParseResult<NodeId> {
        let lhs = self.parse_additive()?;
        let kind = match self.peek().kind {
            TokenKind::EqEq => Kind::Equals,
            TokenKind::NotEq => Kind::NotEquals,
            TokenKind::Lt => Kind::LessThan,
            TokenKind::Gt => Kind::GreaterThan,
            TokenKind::Lte => Kind::LessThanOrEquals,
            TokenKind::Gte => Kind::GreaterThanOrEquals,
            _ => return Ok(lhs),
        };
        let token = self.advance();
        let rhs = self.parse_additive()?;
        Ok(self.infix(lhs, kind, &token, rhs))
    }

    fn parse_additive(&mut self) -> ParseResult<NodeId> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let kind = match self.peek().kind {
                TokenKind::Plus => Kind::Add,
                TokenKind::Minus => Kind::Subtract,
                _ => return Ok(lhs),
            };
            let token = self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = self.infix(lhs, kind, &token, rhs);
        }
    }

    fn parse_multiplicative(&mut self) -> ParseResult<NodeId> {
        let mut lhs = self.parse_unary()?;
        loop {
            let kind = match self.peek().kind {
                TokenKind::Star => Kind::Multiply,
                TokenKind::Slash => Kind::Divide,
                TokenKind::Percent => Kind::Modulo,
                _ => return Ok(lhs),
            };
            let token = self.advance();
            let rhs = self.parse_unary()?;
            lhs = self.infix(lhs, kind, &token, rhs);
        }
    }

    fn parse_unary(&mut self) -> ParseResult<NodeId> {
        if self.peek().kind == TokenKind::Minus {
            let token = self.advance();
            let operand = self.parse_unary()?;
            let loc = token.location(&self.source);
            let unary = self.ast.node(Kind::UnaryExpr, loc);
            self.ast.push_child(unary, operand);
            return Ok(self.wrap_expr(unary));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> ParseResult<NodeId> {
        let primary = self.parse_primary()?;
        self.parse_postfix_from(primary)
    }

    /// Ref args (`.name`, `[expr]`) and calls (`(args)`), applied left to
    /// right onto the parsed primary.
    fn parse_postfix_from(&mut self, expr: NodeId) -> ParseResult<NodeId> {
        if !matches!(
            self.peek().kind,
            TokenKind::Dot | TokenKind::LBrack | TokenKind::LParen
        ) {
            return Ok(expr);
        }

        // peel the Expr wrapper down to the head node
        let inner = self.ast.child(expr, 0);
        let head_node = if self.ast.kind(inner) == Kind::Term && self.ast.kind(self.ast.child(inner, 0)) == Kind::Var {
            self.ast.detach(self.ast.child(inner, 0))
        } else {
            self.ast.detach(inner)
        };

        let loc = self.ast.loc(head_node).clone();
        let mut head = self.ast.node(Kind::RefHead, loc.clone());
        self.ast.push_child(head, head_node);
        let mut argseq = self.ast.node(Kind::RefArgSeq, loc.clone());

        loop {
            match self.peek().kind {
                TokenKind::Dot => {
                    self.advance();
                    let seg = self.expect(TokenKind::Ident, "identifier after `.`")?;
                    let var = self.leaf(Kind::Var, &seg);
                    let arg = self.wrap(Kind::RefArgDot, var);
                    self.ast.push_child(argseq, arg);
                }
                TokenKind::LBrack => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(TokenKind::RBrack, "`]`")?;
                    let arg = self.wrap(Kind::RefArgBrack, index);
                    self.ast.push_child(argseq, arg);
                }
                TokenKind::LParen => {
                    // the ref so far is the callee
                    self.advance();
                    let reference = self.ast.node(Kind::Ref, loc.clone());
                    self.ast.push_child(reference, head);
                    self.ast.push_child(reference, argseq);

                    let args = self.ast.node(Kind::ExprSeq, loc.clone());
                    if self.peek().kind != TokenKind::RParen {
                        loop {
                            let arg = self.parse_expr()?;
                            self.ast.push_child(args, arg);
                            if self.peek().kind == TokenKind::Comma {
                                self.advance();
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(TokenKind::RParen, "`)`")?;
                    let call = self.ast.node(Kind::ExprCall, loc.clone());
                    self.ast.push_child(call, reference);
                    self.ast.push_child(call, args);

                    // further ref args chain onto the call result
                    head = self.ast.node(Kind::RefHead, loc.clone());
                    self.ast.push_child(head, call);
                    argseq = self.ast.node(Kind::RefArgSeq, loc.clone());
                }
                _ => break,
            }
        }

        // collapse `RefHead(x)` with no args back to x
        if self.ast.size(argseq) == 0 {
            let head_inner = self.ast.detach(self.ast.child(head, 0));
            return Ok(match self.ast.kind(head_inner) {
                Kind::Var => self.var_term_expr(head_inner),
                Kind::ExprCall => self.wrap_expr(head_inner),
                _ => {
                    let term = self.wrap(Kind::Term, head_inner);
                    self.wrap_expr(term)
                }
            });
        }

        let reference = self.ast.node(Kind::Ref, loc);
        self.ast.push_child(reference, head);
        self.ast.push_child(reference, argseq);
        let term = self.wrap(Kind::Term, reference);
        Ok(self.wrap_expr(term))
    }

    fn parse_primary(&mut self) -> ParseResult<NodeId> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Int => {
                self.advance();
                Ok(self.scalar_expr(Kind::Int, &token))
            }
            TokenKind::Float => {
                self.advance();
                Ok(self.scalar_expr(Kind::Float, &token))
            }
            TokenKind::String => {
                self.advance();
                Ok(self.scalar_expr(Kind::JSONString, &token))
            }
            TokenKind::RawString => {
                self.advance();
                Ok(self.scalar_expr(Kind::RawString, &token))
            }
            TokenKind::Ident => match token.text.as_str() {
                "true" => {
                    self.advance();
                    Ok(self.scalar_expr(Kind::True, &token))
                }
                "false" => {
                    self.advance();
                    Ok(self.scalar_expr(Kind::False, &token))
                }
                "null" => {
                    self.advance();
                    Ok(self.scalar_expr(Kind::Null, &token))
                }
                _ => {
                    self.advance();
                    let var = self.leaf(Kind::Var, &token);
                    Ok(self.var_term_expr(var))
                }
            },
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(TokenKind::RParen, "`)`")?;
                Ok(expr)
            }
            TokenKind::LBrack => self.parse_array_or_compr(),
            TokenKind::LBrace => self.parse_brace_collection(),
            _ => Err(self.error_here(format!("unexpected token `{}`", token.text))),
        }
    }

    fn parse_array_or_compr(&mut self) -> ParseResult<NodeId> {
        let loc = self.here();
        self.expect(TokenKind::LBrack, "`[`")?;

        if self.peek().kind == TokenKind::RBrack {
            self.advance();
            let array = self.ast.node(Kind::Array, loc);
            let term = self.wrap(Kind::Term, array);
            return Ok(self.wrap_expr(term));
        }

        let first = self.parse_no_assign()?;
        if self.peek().kind == TokenKind::Pipe {
            self.advance();
            let body = self.parse_compr_body()?;
            self.expect(TokenKind::RBrack, "`]`")?;
            let compr = self.ast.node(Kind::ArrayCompr, loc);
            self.ast.push_child(compr, first);
            self.ast.push_child(compr, body);
            let term = self.wrap(Kind::Term, compr);
            return Ok(self.wrap_expr(term));
        }

        let array = self.ast.node(Kind::Array, loc);
        self.ast.push_child(array, first);
        while self.peek().kind == TokenKind::Comma {
            self.advance();
            if self.peek().kind == TokenKind::RBrack {
                break;
            }
            let item = self.parse_no_assign()?;
            self.ast.push_child(array, item);
        }
        self.expect(TokenKind::RBrack, "`]`")?;
        let term = self.wrap(Kind::Term, array);
        Ok(self.wrap_expr(term))
    }

    /// `{}` object, `{k: v, …}` object, `{x, …}` set, `{x | body}` set
    /// comprehension, `{k: v | body}` object comprehension.
    fn parse_brace_collection(&mut self) -> ParseResult<NodeId> {
        let loc = self.here();
        self.expect(TokenKind::LBrace, "`{`")?;

        if self.peek().kind == TokenKind::RBrace {
            self.advance();
            let object = self.ast.node(Kind::Object, loc);
            let term = self.wrap(Kind::Term, object);
            return Ok(self.wrap_expr(term));
        }

        let first = self.parse_no_assign()?;

        if self.peek().kind == TokenKind::Colon {
            self.advance();
            let value = self.parse_no_assign()?;
            if self.peek().kind == TokenKind::Pipe {
                self.advance();
                let body = self.parse_compr_body()?;
                self.expect(TokenKind::RBrace, "`}`")?;
                let compr = self.ast.node(Kind::ObjectCompr, loc);
                self.ast.push_child(compr, first);
                self.ast.push_child(compr, value);
                self.ast.push_child(compr, body);
                let term = self.wrap(Kind::Term, compr);
                return Ok(self.wrap_expr(term));
            }

            let object = self.ast.node(Kind::Object, loc);
            let item = self.ast.node(Kind::ObjectItem, self.ast.loc(first).clone());
            self.ast.push_child(item, first);
            self.ast.push_child(item, value);
            self.ast.push_child(object, item);
            while self.peek().kind == TokenKind::Comma {
                self.advance();
                if self.peek().kind == TokenKind::RBrace {
                    break;
                }
                let key = self.parse_no_assign()?;
                self.expect(TokenKind::Colon, "`:`")?;
                let value = self.parse_no_assign()?;
                let item_loc = self.ast.loc(key).clone();
                let item = self.ast.node(Kind::ObjectItem, item_loc);
                self.ast.push_child(item, key);
                self.ast.push_child(item, value);
                self.ast.push_child(object, item);
            }
            self.expect(TokenKind::RBrace, "`}`")?;
            let term = self.wrap(Kind::Term, object);
            return Ok(self.wrap_expr(term));
        }

        if self.peek().kind == TokenKind::Pipe {
            self.advance();
            let body = self.parse_compr_body()?;
            self.expect(TokenKind::RBrace, "`}`")?;
            let compr = self.ast.node(Kind::SetCompr, loc);
            self.ast.push_child(compr, first);
            self.ast.push_child(compr, body);
            let term = self.wrap(Kind::Term, compr);
            return Ok(self.wrap_expr(term));
        }

        let set = self.ast.node(Kind::Set, loc);
        self.ast.push_child(set, first);
        while self.peek().kind == TokenKind::Comma {
            self.advance();
            if self.peek().kind == TokenKind::RBrace {
                break;
            }
            let item = self.parse_no_assign()?;
            self.ast.push_child(set, item);
        }
        self.expect(TokenKind::RBrace, "`}`")?;
        let term = self.wrap(Kind::Term, set);
        Ok(self.wrap_expr(term))
    }

    /// The body of a comprehension: literals separated by `;` or newlines.
    fn parse_compr_body(&mut self) -> ParseResult<NodeId> {
        let loc = self.here();
        let body = self.ast.node(Kind::UnifyBody, loc);
        loop {
            let literal = self.parse_literal()?;
            self.ast.push_child(body, literal);
            if self.peek().kind == TokenKind::Semicolon {
                self.advance();
                continue;
            }
            if matches!(self.peek().kind, TokenKind::RBrack | TokenKind::RBrace) {
                break;
            }
            // newline-separated continuation
            if self.peek().line > self.prev_line() {
                continue;
            }
            break;
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wf::wf_parse;

    fn parse(text: &str) -> (Ast, NodeId) {
        let mut ast = Ast::new();
        let source = Source::new("test.rego", text);
        let module = Parser::parse_module(&mut ast, source).unwrap();
        (ast, module)
    }

    #[test]
    fn parses_package_and_simple_rules() {
        let (ast, module) = parse("package objects\n\nindex := 1\nnames := [\"prod\", \"dev\"]\n");
        let errors = wf_parse().check(&ast, module);
        assert!(errors.is_empty(), "{errors}");
        let policy = ast.child_of_kind(module, Kind::Policy).unwrap();
        assert_eq!(ast.size(policy), 2);
        assert_eq!(ast.rule_name(ast.child(policy, 0)).unwrap(), "index");
    }

    #[test]
    fn parses_bodies_and_negation() {
        let (ast, module) = parse("package n\n\nallow { not denied }\ndenied { input.user == \"mallory\" }\n");
        let errors = wf_parse().check(&ast, module);
        assert!(errors.is_empty(), "{errors}");
    }

    #[test]
    fn parses_if_and_contains() {
        let (ast, module) = parse(
            "package p\n\nimport future.keywords.if\nimport future.keywords.contains\n\ndeny contains \"msg\" if input.bad\nallow if { input.ok }\n",
        );
        let errors = wf_parse().check(&ast, module);
        assert!(errors.is_empty(), "{errors}");
    }

    #[test]
    fn parses_comprehensions_and_membership() {
        let (ast, module) = parse(
            "package p\n\nxs := [1, 2, 3, 4]\nevens := [x | x := xs[_]; x % 2 == 0]\nhas_two := 2 in evens\n",
        );
        let errors = wf_parse().check(&ast, module);
        assert!(errors.is_empty(), "{errors}");
    }

    #[test]
    fn parses_function_rules() {
        let (ast, module) = parse("package f\n\nf(x) := x + 1\ng(a, b) := a * b { a > 0 }\n");
        let errors = wf_parse().check(&ast, module);
        assert!(errors.is_empty(), "{errors}");
    }

    #[test]
    fn parses_else_and_default() {
        let (ast, module) = parse(
            "package e\n\ndefault verdict := \"none\"\nverdict := \"hi\" { input.x > 10 } else := \"lo\" { input.x > 1 }\n",
        );
        let errors = wf_parse().check(&ast, module);
        assert!(errors.is_empty(), "{errors}");
    }

    #[test]
    fn parses_set_algebra_query() {
        let mut ast = Ast::new();
        let source = Source::new("query.rego", "{1,2,3} - {2} = s; {1,2} | {2,3} = u");
        let query = Parser::parse_query(&mut ast, source).unwrap();
        assert_eq!(ast.kind(query), Kind::Query);
        let body = ast.child(query, 0);
        assert_eq!(ast.size(body), 2);
    }

    #[test]
    fn parses_with_modifier() {
        let mut ast = Ast::new();
        let source = Source::new("query.rego", "data.w.f with input as {\"x\": 41}");
        let query = Parser::parse_query(&mut ast, source).unwrap();
        let body = ast.child(query, 0);
        let literal = ast.child(body, 0);
        assert!(ast.child_of_kind(literal, Kind::WithSeq).is_some());
    }

    #[test]
    fn rejects_every() {
        let mut ast = Ast::new();
        let source = Source::new("test.rego", "package p\nq { every x in [1] { x > 0 } }\n");
        let err = Parser::parse_module(&mut ast, source).unwrap_err();
        assert_eq!(err.code, ErrorCode::CompileError);
    }

    #[test]
    fn reports_parse_error_with_location() {
        let mut ast = Ast::new();
        let source = Source::new("bad.rego", "package p\nx := := 1\n");
        let err = Parser::parse_module(&mut ast, source).unwrap_err();
        assert_eq!(err.code, ErrorCode::ParseError);
        let loc = err.location.unwrap();
        assert_eq!(loc.file, "bad.rego");
        assert_eq!(loc.row, 2);
    }
}
