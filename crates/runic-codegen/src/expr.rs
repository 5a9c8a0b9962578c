//! Offset expressions for the generated code.
//!
//! Offsets are built as small trees over literals and named values, then
//! folded and rendered with minimal parentheses. Rendering is the only
//! textual surface, so keeping it here keeps the emitted source stable.

use std::fmt;

use runic_rules::ArithOp;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Lit(i64),
    Var(&'static str),
    Bin {
        op: ArithOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    pub fn bin(op: ArithOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Bin {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn add(lhs: Expr, rhs: Expr) -> Expr {
        Expr::bin(ArithOp::Add, lhs, rhs)
    }

    /// Collapses literal-only subtrees bottom-up. Division keeps a zero
    /// divisor unfolded; the emitter rejects it instead.
    pub fn fold(self) -> Expr {
        match self {
            Expr::Bin { op, lhs, rhs } => {
                let lhs = lhs.fold();
                let rhs = rhs.fold();
                if let (Expr::Lit(a), Expr::Lit(b)) = (&lhs, &rhs) {
                    let folded = match op {
                        ArithOp::Add => Some(a.wrapping_add(*b)),
                        ArithOp::Sub => Some(a.wrapping_sub(*b)),
                        ArithOp::Mul => Some(a.wrapping_mul(*b)),
                        ArithOp::Div => a.checked_div(*b),
                    };
                    if let Some(value) = folded {
                        return Expr::Lit(value);
                    }
                }
                Expr::Bin {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                }
            }
            leaf => leaf,
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Bin { op, .. } => match op {
                ArithOp::Add | ArithOp::Sub => 1,
                ArithOp::Mul | ArithOp::Div => 2,
            },
            _ => 3,
        }
    }

    fn render(&self, f: &mut fmt::Formatter<'_>, parent: Option<(u8, ArithOp)>, is_rhs: bool) -> fmt::Result {
        match self {
            Expr::Lit(value) => write!(f, "{value}"),
            Expr::Var(name) => write!(f, "{name}"),
            Expr::Bin { op, lhs, rhs } => {
                let prec = self.precedence();
                // parenthesise when the parent binds tighter, or when we
                // sit right of a non-associative parent at equal strength
                let needs_parens = match parent {
                    Some((parent_prec, parent_op)) => {
                        prec < parent_prec
                            || (prec == parent_prec
                                && is_rhs
                                && matches!(parent_op, ArithOp::Sub | ArithOp::Div))
                    }
                    None => false,
                };
                if needs_parens {
                    write!(f, "(")?;
                }
                lhs.render(f, Some((prec, *op)), false)?;
                let symbol = match op {
                    ArithOp::Add => "+",
                    ArithOp::Sub => "-",
                    ArithOp::Mul => "*",
                    ArithOp::Div => "/",
                };
                write!(f, " {symbol} ")?;
                rhs.render(f, Some((prec, *op)), true)?;
                if needs_parens {
                    write!(f, ")")?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.render(f, None, false)
    }
}
