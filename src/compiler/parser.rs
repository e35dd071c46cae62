//! Single-pass recursive-descent parser producing an AST.

use crate::lexer::{Lexer, SyntaxError, Token, TokenKind};

use super::ast::*;

pub struct Parser {
    lex: Lexer,
}

/// Precedence climbing table. `(left, right)` binding
/// powers; right-associative operators have `right < left`.
fn binop_of(kind: &TokenKind) -> Option<(BinOp, u8, u8)> {
    use BinOp::*;
    use TokenKind as T;
    Some(match kind {
        T::Or => (Or, 1, 1),
        T::And => (And, 2, 2),
        T::Less => (Less, 3, 3),
        T::Greater => (Greater, 3, 3),
        T::LessEq => (LessEq, 3, 3),
        T::GreaterEq => (GreaterEq, 3, 3),
        T::NotEq => (NotEq, 3, 3),
        T::Eq => (Eq, 3, 3),
        T::Concat => (Concat, 8, 7), // right-assoc
        T::Plus => (Add, 9, 9),
        T::Minus => (Sub, 9, 9),
        T::Star => (Mul, 10, 10),
        T::Slash => (Div, 10, 10),
        T::Percent => (Mod, 10, 10),
        T::Caret => (Pow, 13, 12), // right-assoc, binds tighter than unary
        _ => return None,
    })
}

const UNARY_PRECEDENCE: u8 = 11;

impl Parser {
    pub fn new(source: &str) -> Result<Parser, SyntaxError> {
        Ok(Parser {
            lex: Lexer::new(source)?,
        })
    }

    pub fn parse_chunk(&mut self) -> Result<Block, SyntaxError> {
        let block = self.parse_block()?;
        self.expect(&TokenKind::Eof)?;
        Ok(block)
    }

    fn cur(&self) -> &TokenKind {
        &self.lex.current().kind
    }

    fn line(&self) -> u32 {
        self.lex.current().line
    }

    fn advance(&mut self) -> Token {
        self.lex.advance()
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.cur()) == std::mem::discriminant(kind)
    }

    fn accept(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<Token, SyntaxError> {
        if !self.check(kind) {
            return Err(self.err(format!("expected {kind:?}, got {:?}", self.cur())));
        }
        Ok(self.advance())
    }

    fn err(&self, message: String) -> SyntaxError {
        SyntaxError {
            message,
            line: self.line(),
        }
    }

    fn expect_name(&mut self) -> Result<String, SyntaxError> {
        match self.cur().clone() {
            TokenKind::Name(n) => {
                self.advance();
                Ok(n)
            }
            other => Err(self.err(format!("expected name, got {other:?}"))),
        }
    }

    fn is_block_end(&self) -> bool {
        matches!(
            self.cur(),
            TokenKind::Eof
                | TokenKind::End
                | TokenKind::Else
                | TokenKind::Elseif
                | TokenKind::Until
        )
    }

    fn parse_block(&mut self) -> Result<Block, SyntaxError> {
        let mut stats = Vec::new();
        while !self.is_block_end() {
            if matches!(self.cur(), TokenKind::Return) {
                stats.push(self.parse_return()?);
                break;
            }
            let stat = self.parse_stat()?;
            if !matches!(stat, Stat::Empty) {
                stats.push(stat);
            }
        }
        Ok(Block { stats })
    }

    fn parse_return(&mut self) -> Result<Stat, SyntaxError> {
        let line = self.line();
        self.advance();
        let exprs = if self.is_block_end() || self.check(&TokenKind::Semi) {
            Vec::new()
        } else {
            self.parse_expr_list()?
        };
        self.accept(&TokenKind::Semi);
        Ok(Stat::Return(exprs, line))
    }

    fn parse_stat(&mut self) -> Result<Stat, SyntaxError> {
        match self.cur().clone() {
            TokenKind::Semi => {
                self.advance();
                Ok(Stat::Empty)
            }
            TokenKind::Break => {
                let line = self.line();
                self.advance();
                Ok(Stat::Break(line))
            }
            TokenKind::Do => {
                self.advance();
                let block = self.parse_block()?;
                self.expect(&TokenKind::End)?;
                Ok(Stat::Do(block))
            }
            TokenKind::While => self.parse_while(),
            TokenKind::Repeat => self.parse_repeat(),
            TokenKind::If => self.parse_if(),
            TokenKind::For => self.parse_for(),
            TokenKind::Function => self.parse_function_stat(),
            TokenKind::Local => self.parse_local(),
            _ => self.parse_expr_stat(),
        }
    }

    fn parse_while(&mut self) -> Result<Stat, SyntaxError> {
        self.advance();
        let cond = self.parse_expr()?;
        self.expect(&TokenKind::Do)?;
        let body = self.parse_block()?;
        self.expect(&TokenKind::End)?;
        Ok(Stat::While(cond, body))
    }

    fn parse_repeat(&mut self) -> Result<Stat, SyntaxError> {
        self.advance();
        let body = self.parse_block()?;
        self.expect(&TokenKind::Until)?;
        let cond = self.parse_expr()?;
        Ok(Stat::Repeat(body, cond))
    }

    fn parse_if(&mut self) -> Result<Stat, SyntaxError> {
        self.advance();
        let mut arms = Vec::new();
        let cond = self.parse_expr()?;
        self.expect(&TokenKind::Then)?;
        arms.push((cond, self.parse_block()?));
        while self.check(&TokenKind::Elseif) {
            self.advance();
            let cond = self.parse_expr()?;
            self.expect(&TokenKind::Then)?;
            arms.push((cond, self.parse_block()?));
        }
        let else_block = if self.accept(&TokenKind::Else) {
            Some(self.parse_block()?)
        } else {
            None
        };
        self.expect(&TokenKind::End)?;
        Ok(Stat::If { arms, else_block })
    }

    fn parse_for(&mut self) -> Result<Stat, SyntaxError> {
        let line = self.line();
        self.advance();
        let first = self.expect_name()?;
        if self.accept(&TokenKind::Assign) {
            let start = self.parse_expr()?;
            self.expect(&TokenKind::Comma)?;
            let stop = self.parse_expr()?;
            let step = if self.accept(&TokenKind::Comma) {
                Some(self.parse_expr()?)
            } else {
                None
            };
            self.expect(&TokenKind::Do)?;
            let body = self.parse_block()?;
            self.expect(&TokenKind::End)?;
            Ok(Stat::NumericFor {
                var: first,
                start,
                stop,
                step,
                body,
                line,
            })
        } else {
            let mut names = vec![first];
            while self.accept(&TokenKind::Comma) {
                names.push(self.expect_name()?);
            }
            self.expect(&TokenKind::In)?;
            let exprs = self.parse_expr_list()?;
            self.expect(&TokenKind::Do)?;
            let body = self.parse_block()?;
            self.expect(&TokenKind::End)?;
            Ok(Stat::GenericFor {
                names,
                exprs,
                body,
                line,
            })
        }
    }

    fn parse_function_stat(&mut self) -> Result<Stat, SyntaxError> {
        let line = self.line();
        self.advance();
        let mut name = self.expect_name()?;
        let mut target = Expr::Name(name.clone());
        let mut is_method = false;
        loop {
            if self.accept(&TokenKind::Dot) {
                let field = self.expect_name()?;
                name = format!("{name}.{field}");
                target = Expr::Index(Box::new(target), Box::new(Expr::Str(field)), line);
            } else if self.accept(&TokenKind::Colon) {
                let field = self.expect_name()?;
                name = format!("{name}:{field}");
                target = Expr::Index(Box::new(target), Box::new(Expr::Str(field)), line);
                is_method = true;
                break;
            } else {
                break;
            }
        }
        let mut body = self.parse_func_body(name)?;
        if is_method {
            body.params.insert(0, "self".to_string());
        }
        Ok(Stat::Assign {
            targets: vec![target],
            exprs: vec![Expr::Function(Box::new(body))],
            line,
        })
    }

    fn parse_func_body(&mut self, name: String) -> Result<FuncBody, SyntaxError> {
        let line = self.line();
        self.expect(&TokenKind::LParen)?;
        let mut params = Vec::new();
        let mut is_vararg = false;
        if !self.check(&TokenKind::RParen) {
            loop {
                if self.accept(&TokenKind::Ellipsis) {
                    is_vararg = true;
                    break;
                }
                params.push(self.expect_name()?);
                if !self.accept(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen)?;
        let body = self.parse_block()?;
        self.expect(&TokenKind::End)?;
        Ok(FuncBody {
            params,
            is_vararg,
            body,
            line,
            name,
        })
    }

    fn parse_local(&mut self) -> Result<Stat, SyntaxError> {
        self.advance();
        if self.accept(&TokenKind::Function) {
            let name = self.expect_name()?;
            let body = self.parse_func_body(name.clone())?;
            return Ok(Stat::LocalFunction(name, body));
        }
        let mut names = vec![self.expect_name()?];
        while self.accept(&TokenKind::Comma) {
            names.push(self.expect_name()?);
        }
        let exprs = if self.accept(&TokenKind::Assign) {
            self.parse_expr_list()?
        } else {
            Vec::new()
        };
        Ok(Stat::Local { names, exprs })
    }

    fn parse_expr_stat(&mut self) -> Result<Stat, SyntaxError> {
        let line = self.line();
        let first = self.parse_suffixed_expr()?;
        if self.check(&TokenKind::Assign) || self.check(&TokenKind::Comma) {
            let mut targets = vec![first];
            while self.accept(&TokenKind::Comma) {
                targets.push(self.parse_suffixed_expr()?);
            }
            self.expect(&TokenKind::Assign)?;
            let exprs = self.parse_expr_list()?;
            Ok(Stat::Assign {
                targets,
                exprs,
                line,
            })
        } else {
            match &first {
                Expr::Call(..) | Expr::MethodCall(..) => Ok(Stat::ExprStat(first)),
                _ => Err(self.err("syntax error: expression statement must be a call".into())),
            }
        }
    }

    fn parse_expr_list(&mut self) -> Result<Vec<Expr>, SyntaxError> {
        let mut exprs = vec![self.parse_expr()?];
        while self.accept(&TokenKind::Comma) {
            exprs.push(self.parse_expr()?);
        }
        Ok(exprs)
    }

    pub fn parse_expr(&mut self) -> Result<Expr, SyntaxError> {
        self.parse_binexpr(0)
    }

    fn parse_binexpr(&mut self, limit: u8) -> Result<Expr, SyntaxError> {
        let mut left = if let Some(op) = self.unop() {
            let line = self.line();
            self.advance();
            let operand = self.parse_binexpr(UNARY_PRECEDENCE)?;
            Expr::Unary(op, Box::new(operand), line)
        } else {
            self.parse_simple_expr()?
        };

        while let Some((op, lp, rp)) = binop_of(self.cur()) {
            if lp <= limit {
                break;
            }
            let line = self.line();
            self.advance();
            let right = self.parse_binexpr(rp)?;
            left = Expr::Binary(op, Box::new(left), Box::new(right), line);
        }
        Ok(left)
    }

    fn unop(&self) -> Option<UnOp> {
        match self.cur() {
            TokenKind::Not => Some(UnOp::Not),
            TokenKind::Minus => Some(UnOp::Neg),
            TokenKind::Hash => Some(UnOp::Len),
            _ => None,
        }
    }

    fn parse_simple_expr(&mut self) -> Result<Expr, SyntaxError> {
        match self.cur().clone() {
            TokenKind::Nil => {
                self.advance();
                Ok(Expr::Nil)
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::True)
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::False)
            }
            TokenKind::Int(i) => {
                self.advance();
                Ok(Expr::Int(i))
            }
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::Str(s))
            }
            TokenKind::Ellipsis => {
                self.advance();
                Ok(Expr::Vararg)
            }
            TokenKind::Function => {
                self.advance();
                let body = self.parse_func_body(String::new())?;
                Ok(Expr::Function(Box::new(body)))
            }
            TokenKind::LBrace => self.parse_table(),
            _ => self.parse_suffixed_expr(),
        }
    }

    fn parse_primary_expr(&mut self) -> Result<Expr, SyntaxError> {
        match self.cur().clone() {
            TokenKind::Name(n) => {
                self.advance();
                Ok(Expr::Name(n))
            }
            TokenKind::LParen => {
                self.advance();
                let e = self.parse_expr()?;
                self.expect(&TokenKind::RParen)?;
                Ok(Expr::Paren(Box::new(e)))
            }
            other => Err(self.err(format!("unexpected symbol near {other:?}"))),
        }
    }

    fn parse_suffixed_expr(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.parse_primary_expr()?;
        loop {
            let line = self.line();
            match self.cur().clone() {
                TokenKind::Dot => {
                    self.advance();
                    let name = self.expect_name()?;
                    expr = Expr::Index(Box::new(expr), Box::new(Expr::Str(name)), line);
                }
                TokenKind::LBracket => {
                    self.advance();
                    let key = self.parse_expr()?;
                    self.expect(&TokenKind::RBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(key), line);
                }
                TokenKind::Colon => {
                    self.advance();
                    let method = self.expect_name()?;
                    let args = self.parse_call_args()?;
                    expr = Expr::MethodCall(Box::new(expr), method, args, line);
                }
                TokenKind::LParen | TokenKind::Str(_) | TokenKind::LBrace => {
                    let args = self.parse_call_args()?;
                    expr = Expr::Call(Box::new(expr), args, line);
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_call_args(&mut self) -> Result<Vec<Expr>, SyntaxError> {
        match self.cur().clone() {
            TokenKind::LParen => {
                self.advance();
                let args = if self.check(&TokenKind::RParen) {
                    Vec::new()
                } else {
                    self.parse_expr_list()?
                };
                self.expect(&TokenKind::RParen)?;
                Ok(args)
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(vec![Expr::Str(s)])
            }
            TokenKind::LBrace => Ok(vec![self.parse_table()?]),
            other => Err(self.err(format!("function arguments expected, got {other:?}"))),
        }
    }

    fn parse_table(&mut self) -> Result<Expr, SyntaxError> {
        let line = self.line();
        self.expect(&TokenKind::LBrace)?;
        let mut fields = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            match self.cur().clone() {
                TokenKind::LBracket => {
                    self.advance();
                    let key = self.parse_expr()?;
                    self.expect(&TokenKind::RBracket)?;
                    self.expect(&TokenKind::Assign)?;
                    let value = self.parse_expr()?;
                    fields.push(TableField::Indexed(key, value));
                }
                TokenKind::Name(n) if matches!(self.lex_peek_next(), TokenKind::Assign) => {
                    self.advance();
                    self.advance();
                    let value = self.parse_expr()?;
                    fields.push(TableField::Named(n, value));
                }
                _ => {
                    fields.push(TableField::Positional(self.parse_expr()?));
                }
            }
            if !self.accept(&TokenKind::Comma) && !self.accept(&TokenKind::Semi) {
                break;
            }
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(Expr::Table(fields, line))
    }

    fn lex_peek_next(&self) -> TokenKind {
        self.lex.lookahead(1).kind.clone()
    }
}
