// =============================================================================
// OPCODE - Bytecode instructions
// =============================================================================

/// A VM instruction. Code buffers store the numeric value followed by a
/// fixed number of `i32` operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Opcode {
    // loads
    LoadConst = 1, // idx
    LoadNull = 2,
    LoadTrue = 3,
    LoadFalse = 4,

    // variables: depth from innermost frame, slot index
    LoadVar = 5,  // depth idx
    StoreVar = 6, // depth idx

    // output
    PrintItem = 7,
    PrintNewline = 8,

    // ==========================================================================
    // Control flow: absolute targets within the owning code object
    // ==========================================================================
    Jmp = 9,       // target
    JmpTrue = 10,  // target; pops, branches only on exactly `true`
    JmpFalse = 11, // target; pops, branches only on exactly `false`

    Pop = 12,

    // scopes
    EnterScope = 13, // slot count
    LeaveScope = 14,

    // functions
    MakeClosure = 20,
    CallFunction = 21, // argc
    Return = 22,

    // unary
    UnaryNeg = 101,
    UnaryNot = 102,

    // binary: pop right, then left
    BinaryAdd = 111,
    BinarySub = 112,
    BinaryMul = 113,
    BinaryDiv = 114,
    BinaryMod = 115,
    BinaryPow = 116,
    BinaryEq = 117,
    BinaryNe = 118,
    BinaryLt = 119,
    BinaryGe = 120,
}

impl Opcode {
    pub const ALL: [Opcode; 29] = [
        Opcode::LoadConst,
        Opcode::LoadNull,
        Opcode::LoadTrue,
        Opcode::LoadFalse,
        Opcode::LoadVar,
        Opcode::StoreVar,
        Opcode::PrintItem,
        Opcode::PrintNewline,
        Opcode::Jmp,
        Opcode::JmpTrue,
        Opcode::JmpFalse,
        Opcode::Pop,
        Opcode::EnterScope,
        Opcode::LeaveScope,
        Opcode::MakeClosure,
        Opcode::CallFunction,
        Opcode::Return,
        Opcode::UnaryNeg,
        Opcode::UnaryNot,
        Opcode::BinaryAdd,
        Opcode::BinarySub,
        Opcode::BinaryMul,
        Opcode::BinaryDiv,
        Opcode::BinaryMod,
        Opcode::BinaryPow,
        Opcode::BinaryEq,
        Opcode::BinaryNe,
        Opcode::BinaryLt,
        Opcode::BinaryGe,
    ];

    pub fn from_i32(value: i32) -> Option<Opcode> {
        let op = match value {
            1 => Opcode::LoadConst,
            2 => Opcode::LoadNull,
            3 => Opcode::LoadTrue,
            4 => Opcode::LoadFalse,
            5 => Opcode::LoadVar,
            6 => Opcode::StoreVar,
            7 => Opcode::PrintItem,
            8 => Opcode::PrintNewline,
            9 => Opcode::Jmp,
            10 => Opcode::JmpTrue,
            11 => Opcode::JmpFalse,
            12 => Opcode::Pop,
            13 => Opcode::EnterScope,
            14 => Opcode::LeaveScope,
            20 => Opcode::MakeClosure,
            21 => Opcode::CallFunction,
            22 => Opcode::Return,
            101 => Opcode::UnaryNeg,
            102 => Opcode::UnaryNot,
            111 => Opcode::BinaryAdd,
            112 => Opcode::BinarySub,
            113 => Opcode::BinaryMul,
            114 => Opcode::BinaryDiv,
            115 => Opcode::BinaryMod,
            116 => Opcode::BinaryPow,
            117 => Opcode::BinaryEq,
            118 => Opcode::BinaryNe,
            119 => Opcode::BinaryLt,
            120 => Opcode::BinaryGe,
            _ => return None,
        };
        Some(op)
    }

    pub fn code(self) -> i32 {
        self as i32
    }

    /// Number of `i32` operands following the opcode.
    pub fn operand_count(self) -> usize {
        match self {
            Opcode::LoadVar | Opcode::StoreVar => 2,
            Opcode::LoadConst
            | Opcode::Jmp
            | Opcode::JmpTrue
            | Opcode::JmpFalse
            | Opcode::EnterScope
            | Opcode::CallFunction => 1,
            _ => 0,
        }
    }

    /// Total instruction width, opcode included.
    pub fn width(self) -> usize {
        1 + self.operand_count()
    }

    pub fn is_jump(self) -> bool {
        matches!(self, Opcode::Jmp | Opcode::JmpTrue | Opcode::JmpFalse)
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::LoadConst => "LOAD_CONST",
            Opcode::LoadNull => "LOAD_NULL",
            Opcode::LoadTrue => "LOAD_TRUE",
            Opcode::LoadFalse => "LOAD_FALSE",
            Opcode::LoadVar => "LOAD_VAR",
            Opcode::StoreVar => "STORE_VAR",
            Opcode::PrintItem => "PRINT_ITEM",
            Opcode::PrintNewline => "PRINT_NEWLINE",
            Opcode::Jmp => "JMP",
            Opcode::JmpTrue => "JMP_TRUE",
            Opcode::JmpFalse => "JMP_FALSE",
            Opcode::Pop => "POP",
            Opcode::EnterScope => "ENTER_SCOPE",
            Opcode::LeaveScope => "LEAVE_SCOPE",
            Opcode::MakeClosure => "MAKE_CLOSURE",
            Opcode::CallFunction => "CALL_FUNCTION",
            Opcode::Return => "RETURN",
            Opcode::UnaryNeg => "UNARY_NEG",
            Opcode::UnaryNot => "UNARY_NOT",
            Opcode::BinaryAdd => "BINARY_ADD",
            Opcode::BinarySub => "BINARY_SUB",
            Opcode::BinaryMul => "BINARY_MUL",
            Opcode::BinaryDiv => "BINARY_DIV",
            Opcode::BinaryMod => "BINARY_MOD",
            Opcode::BinaryPow => "BINARY_POW",
            Opcode::BinaryEq => "BINARY_EQ",
            Opcode::BinaryNe => "BINARY_NE",
            Opcode::BinaryLt => "BINARY_LT",
            Opcode::BinaryGe => "BINARY_GE",
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_values() {
        assert_eq!(Opcode::LoadConst.code(), 1);
        assert_eq!(Opcode::LeaveScope.code(), 14);
        assert_eq!(Opcode::MakeClosure.code(), 20);
        assert_eq!(Opcode::UnaryNot.code(), 102);
        assert_eq!(Opcode::BinaryGe.code(), 120);
    }

    #[test]
    fn test_from_i32_round_trips_every_opcode() {
        for op in Opcode::ALL {
            assert_eq!(Opcode::from_i32(op.code()), Some(op));
        }
        assert_eq!(Opcode::from_i32(0), None);
        assert_eq!(Opcode::from_i32(15), None);
        assert_eq!(Opcode::from_i32(121), None);
    }

    #[test]
    fn test_operand_counts() {
        assert_eq!(Opcode::LoadVar.width(), 3);
        assert_eq!(Opcode::JmpFalse.width(), 2);
        assert_eq!(Opcode::CallFunction.operand_count(), 1);
        assert_eq!(Opcode::MakeClosure.operand_count(), 0);
        assert_eq!(Opcode::BinaryAdd.width(), 1);
    }
}
