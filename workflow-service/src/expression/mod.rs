// Expression Engine Module
// Typed guard conditions and ${{ }} template interpolation

pub mod evaluator;
pub mod functions;
pub mod lexer;
pub mod parser;
pub mod value;

pub use evaluator::{
    EvalError, Evaluator, ExpressionContext, ExpressionEngine, GithubContext, JobStatusContext,
    StepContext,
};
pub use functions::BuiltinFunctions;
pub use lexer::{extract_expressions, strip_delimiters, LexError, Lexer, Segment, Token};
pub use parser::{BinaryOp, Expr, ExprParser, ParseExprError, Reference, ReferencePart, UnaryOp};
pub use value::Value;
