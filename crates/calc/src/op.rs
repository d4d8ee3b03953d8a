/// The closed set of opcodes the parser emits. Most are operators; the
/// rest are grammatical markers that live only on the parse stack.
/// Changes here must be mirrored in the `INFO` table below, which is
/// indexed by discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Opcode {
    Add,
    Ag,
    And,
    Append,
    Array,
    As,
    Assign,
    Between,
    BitAnd,
    BitNot,
    BitOr,
    BitXor,
    Boolean,
    Coalesce,
    Colon,
    Comma,
    Descending,
    Distinct,
    Divide,
    Dot,
    DotDot,
    Each,
    Ellipsis,
    EndArray,
    EndObject,
    EndParen,
    Environ,
    Eq,
    EqStrict,
    Find,
    FnCall,
    From,
    Ge,
    Group,
    GroupBy,
    Gt,
    Having,
    IcEq,
    IcNe,
    In,
    IsNotNull,
    IsNull,
    Le,
    Like,
    Limit,
    Literal,
    LJoin,
    Lt,
    MaybeAssign,
    MaybeMember,
    Modulo,
    Multiply,
    Name,
    Ne,
    Negate,
    NeStrict,
    NJoin,
    Not,
    NotIn,
    NotLike,
    Null,
    Number,
    Object,
    Or,
    OrderBy,
    Question,
    Regex,
    RJoin,
    Select,
    StartArray,
    StartObject,
    StartParen,
    String,
    Subscript,
    Subtract,
    Values,
    Where,
    Invalid,
}

/// Broad operator classes driving the shift-reduce rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpClass {
    /// Not an operator; some other kind of token.
    Other,
    /// Left-associative infix binary operator.
    Infix,
    /// Right-associative infix binary operator.
    RightInfix,
    /// Prefix unary operator.
    Prefix,
    /// Postfix unary operator.
    Postfix,
}

pub struct OpInfo {
    pub text: &'static str,
    pub prec: i32,
    /// True for tokens that cannot remain in a finished expression.
    pub noexpr: bool,
    pub class: OpClass,
}

use OpClass::*;

/// Indexed by opcode. Precedence is higher-binds-tighter; -1 marks
/// non-operators. The `text` of symbol operators doubles as the lexer's
/// match table; keyword operators are recognised by the name scanner
/// instead and their text here is purely for diagnostics.
#[rustfmt::skip]
static INFO: [OpInfo; Opcode::Invalid as usize + 1] = [
    OpInfo { text: "+",    prec: 210, noexpr: false, class: Infix },      // Add
    OpInfo { text: "AG",   prec: -1,  noexpr: true,  class: Other },      // Ag
    OpInfo { text: "&&",   prec: 140, noexpr: false, class: Infix },      // And
    OpInfo { text: "[]=",  prec: 110, noexpr: false, class: Infix },      // Append
    OpInfo { text: "ARR",  prec: -1,  noexpr: false, class: Other },      // Array
    OpInfo { text: "AS",   prec: 121, noexpr: true,  class: Infix },      // As
    OpInfo { text: "=",    prec: 110, noexpr: false, class: Infix },      // Assign
    OpInfo { text: "BTWN", prec: 121, noexpr: false, class: Infix },      // Between
    OpInfo { text: "&",    prec: 160, noexpr: false, class: Infix },      // BitAnd
    OpInfo { text: "~",    prec: 240, noexpr: false, class: Prefix },     // BitNot
    OpInfo { text: "|",    prec: 150, noexpr: false, class: Infix },      // BitOr
    OpInfo { text: "^",    prec: 160, noexpr: false, class: Infix },      // BitXor
    OpInfo { text: "BOO",  prec: -1,  noexpr: false, class: Other },      // Boolean
    OpInfo { text: "??",   prec: 130, noexpr: false, class: Infix },      // Coalesce
    OpInfo { text: ":",    prec: 121, noexpr: false, class: RightInfix }, // Colon
    OpInfo { text: ",",    prec: 110, noexpr: false, class: Infix },      // Comma
    OpInfo { text: "DES",  prec: 3,   noexpr: true,  class: Postfix },    // Descending
    OpInfo { text: "DIS",  prec: 2,   noexpr: true,  class: Other },      // Distinct
    OpInfo { text: "/",    prec: 220, noexpr: false, class: Infix },      // Divide
    OpInfo { text: ".",    prec: 270, noexpr: false, class: Infix },      // Dot
    OpInfo { text: "..",   prec: 270, noexpr: false, class: Infix },      // DotDot
    OpInfo { text: "##",   prec: 115, noexpr: false, class: Infix },      // Each
    OpInfo { text: "...",  prec: 127, noexpr: false, class: Infix },      // Ellipsis
    OpInfo { text: "]",    prec: 0,   noexpr: true,  class: Other },      // EndArray
    OpInfo { text: "}",    prec: 0,   noexpr: true,  class: Other },      // EndObject
    OpInfo { text: ")",    prec: 0,   noexpr: true,  class: Other },      // EndParen
    OpInfo { text: "$",    prec: 169, noexpr: false, class: Other },      // Environ
    OpInfo { text: "==",   prec: 180, noexpr: false, class: Infix },      // Eq
    OpInfo { text: "===",  prec: 180, noexpr: false, class: Infix },      // EqStrict
    OpInfo { text: "@",    prec: 116, noexpr: false, class: Infix },      // Find
    OpInfo { text: "F",    prec: 170, noexpr: false, class: Other },      // FnCall
    OpInfo { text: "FRO",  prec: 2,   noexpr: false, class: Other },      // From
    OpInfo { text: ">=",   prec: 190, noexpr: false, class: Infix },      // Ge
    OpInfo { text: "#",    prec: 115, noexpr: false, class: Infix },      // Group
    OpInfo { text: "GRO",  prec: 2,   noexpr: true,  class: Other },      // GroupBy
    OpInfo { text: ">",    prec: 190, noexpr: false, class: Infix },      // Gt
    OpInfo { text: "HAV",  prec: 2,   noexpr: true,  class: Other },      // Having
    OpInfo { text: "=",    prec: 180, noexpr: false, class: Infix },      // IcEq
    OpInfo { text: "<>",   prec: 180, noexpr: false, class: Infix },      // IcNe
    OpInfo { text: "IN",   prec: 175, noexpr: false, class: Infix },      // In
    OpInfo { text: "N!",   prec: 117, noexpr: false, class: Postfix },    // IsNotNull
    OpInfo { text: "N=",   prec: 117, noexpr: false, class: Postfix },    // IsNull
    OpInfo { text: "<=",   prec: 190, noexpr: false, class: Infix },      // Le
    OpInfo { text: "LIK",  prec: 180, noexpr: false, class: Infix },      // Like
    OpInfo { text: "LIM",  prec: 2,   noexpr: true,  class: Other },      // Limit
    OpInfo { text: "LIT",  prec: -1,  noexpr: false, class: Other },      // Literal
    OpInfo { text: "#<",   prec: 117, noexpr: false, class: Infix },      // LJoin
    OpInfo { text: "<",    prec: 190, noexpr: false, class: Infix },      // Lt
    OpInfo { text: "=??",  prec: 110, noexpr: false, class: Infix },      // MaybeAssign
    OpInfo { text: ":??",  prec: 121, noexpr: false, class: Infix },      // MaybeMember
    OpInfo { text: "%",    prec: 220, noexpr: false, class: Infix },      // Modulo
    OpInfo { text: "*",    prec: 220, noexpr: false, class: Infix },      // Multiply
    OpInfo { text: "NAM",  prec: -1,  noexpr: false, class: Other },      // Name
    OpInfo { text: "!=",   prec: 180, noexpr: false, class: Infix },      // Ne
    OpInfo { text: "U-",   prec: 240, noexpr: false, class: Prefix },     // Negate
    OpInfo { text: "!==",  prec: 180, noexpr: false, class: Infix },      // NeStrict
    OpInfo { text: "#=",   prec: 117, noexpr: false, class: Infix },      // NJoin
    OpInfo { text: "!",    prec: 240, noexpr: false, class: Prefix },     // Not
    OpInfo { text: "NIN",  prec: 175, noexpr: false, class: Infix },      // NotIn
    OpInfo { text: "NLK",  prec: 180, noexpr: false, class: Infix },      // NotLike
    OpInfo { text: "NUL",  prec: -1,  noexpr: false, class: Other },      // Null
    OpInfo { text: "NUM",  prec: -1,  noexpr: false, class: Other },      // Number
    OpInfo { text: "OBJ",  prec: -1,  noexpr: false, class: Other },      // Object
    OpInfo { text: "||",   prec: 130, noexpr: false, class: Infix },      // Or
    OpInfo { text: "ORD",  prec: 2,   noexpr: true,  class: Other },      // OrderBy
    OpInfo { text: "?",    prec: 121, noexpr: false, class: RightInfix }, // Question
    OpInfo { text: "REG",  prec: -1,  noexpr: false, class: Other },      // Regex
    OpInfo { text: "#>",   prec: 117, noexpr: false, class: Infix },      // RJoin
    OpInfo { text: "SEL",  prec: 1,   noexpr: true,  class: Other },      // Select
    OpInfo { text: "[",    prec: 260, noexpr: true,  class: Other },      // StartArray
    OpInfo { text: "{",    prec: 260, noexpr: true,  class: Other },      // StartObject
    OpInfo { text: "(",    prec: 260, noexpr: true,  class: Other },      // StartParen
    OpInfo { text: "STR",  prec: -1,  noexpr: false, class: Other },      // String
    OpInfo { text: "S[",   prec: 170, noexpr: false, class: Other },      // Subscript
    OpInfo { text: "-",    prec: 210, noexpr: false, class: Infix },      // Subtract
    OpInfo { text: "VAL",  prec: 125, noexpr: false, class: Infix },      // Values
    OpInfo { text: "WHE",  prec: 2,   noexpr: true,  class: Other },      // Where
    OpInfo { text: "XXX",  prec: 666, noexpr: true,  class: Other },      // Invalid
];

/// Symbol operators the lexer matches against source text, longest first.
#[rustfmt::skip]
static SYMBOLS: &[(&str, Opcode)] = &[
    ("===", Opcode::EqStrict),
    ("!==", Opcode::NeStrict),
    ("...", Opcode::Ellipsis),
    (":??", Opcode::MaybeMember),
    ("=??", Opcode::MaybeAssign),
    ("==",  Opcode::Eq),
    ("!=",  Opcode::Ne),
    ("<>",  Opcode::IcNe),
    ("<=",  Opcode::Le),
    (">=",  Opcode::Ge),
    ("&&",  Opcode::And),
    ("||",  Opcode::Or),
    ("??",  Opcode::Coalesce),
    ("..",  Opcode::DotDot),
    ("##",  Opcode::Each),
    ("#<",  Opcode::LJoin),
    ("#>",  Opcode::RJoin),
    ("#=",  Opcode::NJoin),
    ("+",   Opcode::Add),
    ("-",   Opcode::Subtract),
    ("*",   Opcode::Multiply),
    ("/",   Opcode::Divide),
    ("%",   Opcode::Modulo),
    ("&",   Opcode::BitAnd),
    ("|",   Opcode::BitOr),
    ("^",   Opcode::BitXor),
    ("~",   Opcode::BitNot),
    ("!",   Opcode::Not),
    ("=",   Opcode::IcEq),
    ("<",   Opcode::Lt),
    (">",   Opcode::Gt),
    ("?",   Opcode::Question),
    (":",   Opcode::Colon),
    (",",   Opcode::Comma),
    (".",   Opcode::Dot),
    ("#",   Opcode::Group),
    ("@",   Opcode::Find),
    ("$",   Opcode::Environ),
    ("(",   Opcode::StartParen),
    (")",   Opcode::EndParen),
    ("[",   Opcode::StartArray),
    ("]",   Opcode::EndArray),
    ("{",   Opcode::StartObject),
    ("}",   Opcode::EndObject),
];

impl Opcode {
    pub fn info(self) -> &'static OpInfo {
        &INFO[self as usize]
    }

    pub fn prec(self) -> i32 {
        self.info().prec
    }

    pub fn class(self) -> OpClass {
        self.info().class
    }

    /// Operator display name, for diagnostics.
    pub fn text(self) -> &'static str {
        self.info().text
    }

    /// Longest symbol-operator match at the head of `src`.
    pub fn match_symbol(src: &str) -> Option<(Opcode, usize)> {
        SYMBOLS
            .iter()
            .find(|(text, _)| src.starts_with(text))
            .map(|(text, op)| (*op, text.len()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_longest_match() {
        assert_eq!(Opcode::match_symbol("=== x"), Some((Opcode::EqStrict, 3)));
        assert_eq!(Opcode::match_symbol("== x"), Some((Opcode::Eq, 2)));
        assert_eq!(Opcode::match_symbol("=?? x"), Some((Opcode::MaybeAssign, 3)));
        assert_eq!(Opcode::match_symbol("#<t"), Some((Opcode::LJoin, 2)));
        assert_eq!(Opcode::match_symbol("word"), None);
    }

    #[test]
    fn test_table_alignment() {
        // The info table is indexed by discriminant; spot-check both ends
        // and a few interior rows.
        assert_eq!(Opcode::Add.text(), "+");
        assert_eq!(Opcode::Invalid.prec(), 666);
        assert_eq!(Opcode::Question.class(), OpClass::RightInfix);
        assert_eq!(Opcode::Dot.prec(), 270);
        assert_eq!(Opcode::Select.prec(), 1);
        assert!(Opcode::StartParen.info().noexpr);
    }
}
