//! Opcode table
//!
//! Every opcode is one byte. Opcodes numbered `HAVE_OPERAND` and above are
//! followed by one little-endian u16 operand.

/// First opcode that carries an operand
pub const HAVE_OPERAND: u8 = 64;

/// What an opcode's operand refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    None,
    /// Plain count (arguments, elements, pops)
    Count,
    /// Literal immediate, reinterpreted by the opcode
    Immediate,
    /// Index into the constant pool
    Constant,
    /// Index into the name table
    Name,
    /// Frame local slot
    Local,
    /// Index into the nested code table
    Code,
    /// Absolute instruction offset
    Jump,
    /// Signed displacement from the opcode's own offset
    RelativeJump,
}

macro_rules! define_opcodes {
    ($( $name:ident = $value:literal => $operand:ident ),* $(,)?) => {
        /// Bytecode instruction tag
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        #[allow(non_camel_case_types)]
        pub enum Op {
            $( $name = $value ),*
        }

        impl Op {
            /// Decode an opcode byte
            pub fn from_u8(byte: u8) -> Option<Op> {
                match byte {
                    $( $value => Some(Op::$name), )*
                    _ => None,
                }
            }

            /// Mnemonic used by the disassembler
            pub fn name(self) -> &'static str {
                match self {
                    $( Op::$name => stringify!($name), )*
                }
            }

            pub fn operand_kind(self) -> OperandKind {
                match self {
                    $( Op::$name => OperandKind::$operand, )*
                }
            }
        }
    };
}

define_opcodes! {
    STOP_CODE = 0 => None,
    NOP = 1 => None,
    POP_TOP = 2 => None,
    POP_TOP_AND_RET = 3 => None,
    ROT_TWO = 4 => None,
    ROT_THREE = 5 => None,
    ROT_FOUR = 6 => None,
    DUP_TOP = 7 => None,
    DUP_TWO = 8 => None,

    UNARY_POSITIVE = 9 => None,
    UNARY_NEGATIVE = 10 => None,
    UNARY_NOT = 11 => None,
    UNARY_BIT_NOT = 12 => None,
    TYPEOF = 13 => None,

    BINARY_ADD = 14 => None,
    BINARY_SUBTRACT = 15 => None,
    BINARY_MULTIPLY = 16 => None,
    BINARY_DIVIDE = 17 => None,
    BINARY_MODULO = 18 => None,
    BINARY_LSHIFT = 19 => None,
    BINARY_RSHIFT = 20 => None,
    BINARY_RSHIFT_LOGICAL = 21 => None,
    BINARY_LT = 22 => None,
    BINARY_LTE = 23 => None,
    BINARY_GT = 24 => None,
    BINARY_GTE = 25 => None,
    BINARY_INSTANCEOF = 26 => None,
    BINARY_IN = 27 => None,
    BINARY_EQ = 28 => None,
    BINARY_STRICT_EQ = 29 => None,
    BINARY_NE = 30 => None,
    BINARY_STRICT_NE = 31 => None,
    BINARY_BIT_AND = 32 => None,
    BINARY_BIT_XOR = 33 => None,
    BINARY_BIT_OR = 34 => None,

    RETURN = 35 => None,
    THROW = 36 => None,
    POP_ENV = 37 => None,
    WITH_SETUP = 38 => None,
    RETURN_SUBROUTINE = 39 => None,
    DEBUGGER = 40 => None,

    PUSH_EMPTY = 41 => None,
    PUSH_UNDEFINED = 42 => None,
    PUSH_TRUE = 43 => None,
    PUSH_FALSE = 44 => None,
    PUSH_NULL = 45 => None,
    PUSH_THIS = 46 => None,
    BUILD_OBJECT = 47 => None,

    LOAD_ELEMENT = 48 => None,
    STORE_ELEMENT = 49 => None,
    DELETE_ELEMENT = 50 => None,
    CALL_ELEMENT = 51 => None,
    INCREMENT_ELEMENT = 52 => None,
    DECREMENT_ELEMENT = 53 => None,
    POSTFIX_INCREMENT_ELEMENT = 54 => None,
    POSTFIX_DECREMENT_ELEMENT = 55 => None,

    STORE_CALL_RESULT = 56 => None,
    DELETE_CALL_RESULT = 57 => None,
    CALL_CALL_RESULT = 58 => None,
    INCREMENT_CALL_RESULT = 59 => None,

    POP_N = 64 => Count,
    LOAD_CONST = 65 => Constant,
    PUSH_INT16 = 66 => Immediate,
    PUSH_UINT16 = 67 => Immediate,
    JUMP_BY = 68 => RelativeJump,
    JUMP_ABSOLUTE = 69 => Jump,
    JUMP_SUBROUTINE = 70 => Jump,
    JUMP_RETURN_HOOKED_SUBROUTINE = 71 => Jump,
    JUMP_IF_FALSE_OR_POP = 72 => Jump,
    JUMP_IF_TRUE_OR_POP = 73 => Jump,
    POP_JUMP_IF_FALSE = 74 => Jump,
    POP_JUMP_IF_TRUE = 75 => Jump,
    FORIN_SETUP = 76 => Jump,
    FORIN_ENUMERATE = 77 => Jump,
    SWITCH_CASE = 78 => Jump,
    SWITCH_DEFAULT = 79 => Jump,
    TRY_CATCH_SETUP = 80 => Name,

    LOAD_NAME = 81 => Name,
    STORE_NAME = 82 => Name,
    CALL_NAME = 83 => Name,
    DELETE_NAME = 84 => Name,
    INCREMENT_NAME = 85 => Name,
    DECREMENT_NAME = 86 => Name,
    POSTFIX_INCREMENT_NAME = 87 => Name,
    POSTFIX_DECREMENT_NAME = 88 => Name,
    TYPEOF_NAME = 89 => Name,

    LOAD_LOCAL = 90 => Local,
    STORE_LOCAL = 91 => Local,
    CALL_LOCAL = 92 => Local,
    DELETE_LOCAL = 93 => Local,
    INCREMENT_LOCAL = 94 => Local,
    DECREMENT_LOCAL = 95 => Local,
    POSTFIX_INCREMENT_LOCAL = 96 => Local,
    POSTFIX_DECREMENT_LOCAL = 97 => Local,
    TYPEOF_LOCAL = 98 => Local,

    LOAD_GLOBAL = 99 => Name,
    STORE_GLOBAL = 100 => Name,
    CALL_GLOBAL = 101 => Name,
    DELETE_GLOBAL = 102 => Name,
    INCREMENT_GLOBAL = 103 => Name,
    DECREMENT_GLOBAL = 104 => Name,
    POSTFIX_INCREMENT_GLOBAL = 105 => Name,
    POSTFIX_DECREMENT_GLOBAL = 106 => Name,
    TYPEOF_GLOBAL = 107 => Name,

    LOAD_PROP = 108 => Name,
    STORE_PROP = 109 => Name,
    DELETE_PROP = 110 => Name,
    CALL_PROP = 111 => Name,
    INCREMENT_PROP = 112 => Name,
    DECREMENT_PROP = 113 => Name,
    POSTFIX_INCREMENT_PROP = 114 => Name,
    POSTFIX_DECREMENT_PROP = 115 => Name,

    STORE_OBJECT_DATA = 116 => Name,
    STORE_OBJECT_GET = 117 => Name,
    STORE_OBJECT_SET = 118 => Name,

    CALL = 119 => Count,
    CONSTRUCT = 120 => Count,
    EVAL = 121 => Count,
    BUILD_FUNCTION = 122 => Code,
    BUILD_ARRAY = 123 => Count,
    INIT_VECTOR_ARRAY_ELEMENT = 124 => Count,
    INIT_SPARSE_ARRAY_ELEMENT = 125 => Count,
}

impl Op {
    #[inline]
    pub fn has_operand(self) -> bool {
        self as u8 >= HAVE_OPERAND
    }

    /// Encoded length in bytes
    #[inline]
    pub fn width(self) -> usize {
        if self.has_operand() { 3 } else { 1 }
    }

    /// Whether the VM keeps an inline cache entry for this instruction
    pub fn is_cacheable(self) -> bool {
        matches!(
            self,
            Op::LOAD_PROP
                | Op::STORE_PROP
                | Op::CALL_PROP
                | Op::LOAD_GLOBAL
                | Op::STORE_GLOBAL
                | Op::CALL_GLOBAL
                | Op::TYPEOF_GLOBAL
        )
    }

    /// Whether control never falls through to the next instruction
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Op::STOP_CODE
                | Op::RETURN
                | Op::THROW
                | Op::JUMP_BY
                | Op::JUMP_ABSOLUTE
                | Op::RETURN_SUBROUTINE
        )
    }
}
