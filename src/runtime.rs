use std::cmp::Ordering;
use std::fmt;

use colored::Colorize;
use miette::{bail, Result};

use crate::output::Output;
use crate::parser::Image;
use crate::{dprint, dprintln, ops};

/// LS-8 can address 256 bytes of memory.
const MEMORY_MAX: usize = 0x100;

/// Register conventionally holding the stack pointer.
const SP: usize = 7;

/// Stack pointer value for an empty stack. The first push writes at 0xF3 and
/// the stack grows downward from there.
const STACK_INIT: u8 = 0xF4;

/// Represents complete program state during runtime.
pub struct RunState {
    /// System memory - 256 bytes in size.
    mem: [u8; MEMORY_MAX],
    /// Program counter
    pc: u8,
    /// 8x 8-bit registers, R7 doubling as the stack pointer
    reg: [u8; 8],
    /// Condition code
    flag: RunFlag,
    /// Set by HLT and by fatal errors; the loop never resumes once set
    halted: bool,
    /// Print a trace line before every step
    tracing: bool,
}

/// Set by CMP, consumed by the conditional jumps.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RunFlag {
    Less = 0b100,
    Greater = 0b010,
    Equal = 0b001,
    Uninit = 0b000,
}

/// Fatal conditions raised by the execution core. None are recoverable; the
/// machine halts and the run is over.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RuntimeError {
    UnknownOpcode { opcode: u8, pc: u8 },
    UnsupportedAluOp { opcode: u8 },
    RegisterOutOfBounds { reg: u8, pc: u8 },
}

impl std::error::Error for RuntimeError {}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownOpcode { opcode, pc } => {
                write!(f, "unknown opcode 0b{opcode:08b} at address 0x{pc:02X}")
            }
            Self::UnsupportedAluOp { opcode } => {
                write!(f, "opcode 0b{opcode:08b} is not a supported ALU operation")
            }
            Self::RegisterOutOfBounds { reg, pc } => {
                write!(
                    f,
                    "register index {reg} at address 0x{pc:02X} is out of range"
                )
            }
        }
    }
}

type OpFn = fn(&mut RunState, u8, u8) -> Result<(), RuntimeError>;

impl RunState {
    // Not generic because of miette error
    pub fn try_from(img: Image) -> Result<RunState> {
        RunState::from_raw(img.bytes())
    }

    pub fn from_raw(raw: &[u8]) -> Result<RunState> {
        if raw.len() > MEMORY_MAX {
            bail!(
                "Program is {} bytes long and cannot fit in {} bytes of memory.",
                raw.len(),
                MEMORY_MAX
            );
        }

        let mut mem = [0u8; MEMORY_MAX];
        mem[..raw.len()].copy_from_slice(raw);

        Ok(RunState {
            mem,
            pc: 0,
            reg: [0, 0, 0, 0, 0, 0, 0, STACK_INIT],
            flag: RunFlag::Uninit,
            halted: false,
            tracing: false,
        })
    }

    const OP_TABLE: [Option<OpFn>; 256] = {
        let mut table: [Option<OpFn>; 256] = [None; 256];
        table[ops::HLT as usize] = Some(Self::hlt as OpFn);
        table[ops::RET as usize] = Some(Self::ret as OpFn);
        table[ops::PUSH as usize] = Some(Self::push as OpFn);
        table[ops::POP as usize] = Some(Self::pop as OpFn);
        table[ops::PRN as usize] = Some(Self::prn as OpFn);
        table[ops::CALL as usize] = Some(Self::call as OpFn);
        table[ops::JMP as usize] = Some(Self::jmp as OpFn);
        table[ops::JEQ as usize] = Some(Self::jeq as OpFn);
        table[ops::JNE as usize] = Some(Self::jne as OpFn);
        table[ops::LDI as usize] = Some(Self::ldi as OpFn);
        table[ops::ADD as usize] = Some(Self::add as OpFn);
        table[ops::MUL as usize] = Some(Self::mul as OpFn);
        table[ops::CMP as usize] = Some(Self::cmp as OpFn);
        table
    };

    /// Run the fetch-decode-execute loop until the program halts.
    pub fn run(&mut self) -> Result<(), RuntimeError> {
        while !self.halted {
            if self.tracing {
                self.trace();
            }
            self.step()?;
        }
        Ok(())
    }

    /// Execute a single instruction. Any error marks the machine halted.
    pub fn step(&mut self) -> Result<(), RuntimeError> {
        let result = self.fetch_execute();
        if result.is_err() {
            self.halted = true;
        }
        result
    }

    fn fetch_execute(&mut self) -> Result<(), RuntimeError> {
        let opcode = self.mem_read(self.pc);
        // Operand bytes are fetched whether or not the instruction uses them.
        // Fetch addresses saturate so an instruction at the top of memory
        // cannot read past address 255.
        let operand_a = self.mem_read(self.pc.saturating_add(1));
        let operand_b = self.mem_read(self.pc.saturating_add(2));

        match Self::OP_TABLE[opcode as usize] {
            Some(handler) => handler(self, operand_a, operand_b)?,
            None => {
                return Err(RuntimeError::UnknownOpcode {
                    opcode,
                    pc: self.pc,
                })
            }
        }

        // Flow-control instructions leave the program counter where the
        // handler put it; everything else advances past its operands.
        if !self.halted && !ops::sets_pc(opcode) {
            self.advance_pc(opcode);
        }
        Ok(())
    }

    /// Print PC, the next three memory bytes and the register file on one line.
    pub fn trace(&self) {
        dprint!(
            "TRACE: {:02X} | {:02X} {:02X} {:02X} |",
            self.pc,
            self.mem_read(self.pc),
            self.mem_read(self.pc.saturating_add(1)),
            self.mem_read(self.pc.saturating_add(2)),
        );
        for i in 0..8 {
            dprint!(" {:02X}", self.reg[i]);
        }
        dprintln!();
    }

    /// Print the register file through the debug channel.
    pub fn print_registers(&self) {
        Output::Debugger.print_registers(self);
    }

    pub fn set_minimal(&mut self, minimal: bool) {
        Output::set_minimal(minimal);
    }

    pub fn set_tracing(&mut self, tracing: bool) {
        self.tracing = tracing;
    }

    // Inspection accessors, mostly of use after the machine has halted.

    pub fn pc(&self) -> u8 {
        self.pc
    }

    pub fn flag(&self) -> RunFlag {
        self.flag
    }

    pub fn halted(&self) -> bool {
        self.halted
    }

    /// Panics if `reg` is not a valid register index.
    pub fn reg(&self, reg: u8) -> u8 {
        self.reg[usize::from(reg)]
    }

    pub fn mem(&self, addr: u8) -> u8 {
        self.mem_read(addr)
    }

    #[inline]
    fn mem_read(&self, addr: u8) -> u8 {
        // Addresses are a byte wide, so every access is in bounds
        self.mem[usize::from(addr)]
    }

    #[inline]
    fn mem_write(&mut self, addr: u8, val: u8) {
        self.mem[usize::from(addr)] = val;
    }

    #[inline]
    fn reg_val(&self, reg: u8) -> Result<u8, RuntimeError> {
        match self.reg.get(usize::from(reg)) {
            Some(val) => Ok(*val),
            None => Err(RuntimeError::RegisterOutOfBounds { reg, pc: self.pc }),
        }
    }

    #[inline]
    fn reg_mut(&mut self, reg: u8) -> Result<&mut u8, RuntimeError> {
        let pc = self.pc;
        self.reg
            .get_mut(usize::from(reg))
            .ok_or(RuntimeError::RegisterOutOfBounds { reg, pc })
    }

    #[inline]
    fn advance_pc(&mut self, opcode: u8) {
        self.pc = self.pc.wrapping_add(ops::operand_count(opcode) + 1);
    }

    fn alu(&mut self, op: u8, reg_a: u8, reg_b: u8) -> Result<(), RuntimeError> {
        debug_assert!(ops::is_alu_op(op), "alu invoked with a non-ALU opcode");
        let a = self.reg_val(reg_a)?;
        let b = self.reg_val(reg_b)?;
        match op {
            ops::ADD => *self.reg_mut(reg_a)? = a.wrapping_add(b),
            ops::MUL => *self.reg_mut(reg_a)? = a.wrapping_mul(b),
            ops::CMP => {
                self.flag = match a.cmp(&b) {
                    Ordering::Less => RunFlag::Less,
                    Ordering::Greater => RunFlag::Greater,
                    Ordering::Equal => RunFlag::Equal,
                }
            }
            _ => return Err(RuntimeError::UnsupportedAluOp { opcode: op }),
        }
        Ok(())
    }

    fn push_val(&mut self, val: u8) {
        // Stack grows downward
        let sp = self.reg[SP].wrapping_sub(1);
        self.reg[SP] = sp;
        self.mem_write(sp, val);
    }

    fn pop_val(&mut self) -> u8 {
        let sp = self.reg[SP];
        let val = self.mem_read(sp);
        self.reg[SP] = sp.wrapping_add(1);
        val
    }

    fn ldi(&mut self, a: u8, b: u8) -> Result<(), RuntimeError> {
        *self.reg_mut(a)? = b;
        Ok(())
    }

    fn prn(&mut self, a: u8, _b: u8) -> Result<(), RuntimeError> {
        let val = self.reg_val(a)?;
        Output::Normal.print_str(&format!("Register {} contains {}\n", a, val));
        Ok(())
    }

    fn add(&mut self, a: u8, b: u8) -> Result<(), RuntimeError> {
        self.alu(ops::ADD, a, b)
    }

    fn mul(&mut self, a: u8, b: u8) -> Result<(), RuntimeError> {
        self.alu(ops::MUL, a, b)
    }

    fn cmp(&mut self, a: u8, b: u8) -> Result<(), RuntimeError> {
        self.alu(ops::CMP, a, b)
    }

    fn push(&mut self, a: u8, _b: u8) -> Result<(), RuntimeError> {
        let val = self.reg_val(a)?;
        self.push_val(val);
        Ok(())
    }

    fn pop(&mut self, a: u8, _b: u8) -> Result<(), RuntimeError> {
        let val = self.pop_val();
        *self.reg_mut(a)? = val;
        Ok(())
    }

    fn call(&mut self, a: u8, _b: u8) -> Result<(), RuntimeError> {
        let target = self.reg_val(a)?;
        // Return address is the instruction after CALL and its operand
        self.push_val(self.pc.wrapping_add(2));
        self.pc = target;
        Ok(())
    }

    fn ret(&mut self, _a: u8, _b: u8) -> Result<(), RuntimeError> {
        self.pc = self.pop_val();
        Ok(())
    }

    fn jmp(&mut self, a: u8, _b: u8) -> Result<(), RuntimeError> {
        self.pc = self.reg_val(a)?;
        Ok(())
    }

    fn jeq(&mut self, a: u8, _b: u8) -> Result<(), RuntimeError> {
        if self.flag == RunFlag::Equal {
            self.pc = self.reg_val(a)?;
        } else {
            self.advance_pc(ops::JEQ);
        }
        Ok(())
    }

    fn jne(&mut self, a: u8, _b: u8) -> Result<(), RuntimeError> {
        if self.flag != RunFlag::Equal {
            self.pc = self.reg_val(a)?;
        } else {
            self.advance_pc(ops::JNE);
        }
        Ok(())
    }

    fn hlt(&mut self, _a: u8, _b: u8) -> Result<(), RuntimeError> {
        self.halted = true;
        Output::Normal.start_new_line();
        Output::Normal.print_str(&format!("{:>12}\n", "Halted".cyan()));
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ops::{ADD, CALL, CMP, HLT, JEQ, JMP, JNE, LDI, MUL, POP, PRN, PUSH, RET};

    fn setup(program: &[u8]) -> RunState {
        RunState::from_raw(program).unwrap()
    }

    #[test]
    fn ldi_writes_register_and_advances() {
        let mut state = setup(&[LDI, 3, 8, HLT]);
        state.step().unwrap();
        assert_eq!(state.reg(3), 8);
        assert_eq!(state.pc(), 3);
    }

    #[test]
    fn prn_advances_past_its_operand() {
        let mut state = setup(&[LDI, 3, 8, PRN, 3, HLT]);
        state.step().unwrap();
        state.step().unwrap();
        assert_eq!(state.pc(), 5);
    }

    #[test]
    fn add_wraps_modulo_256() {
        let mut state = setup(&[LDI, 0, 250, LDI, 1, 10, ADD, 0, 1, HLT]);
        state.run().unwrap();
        assert_eq!(state.reg(0), 4);
        assert_eq!(state.reg(1), 10);
    }

    #[test]
    fn mul_wraps_modulo_256() {
        let mut state = setup(&[LDI, 0, 16, LDI, 1, 32, MUL, 0, 1, HLT]);
        state.run().unwrap();
        assert_eq!(state.reg(0), 0);
    }

    #[test]
    fn cmp_sets_exactly_one_flag() {
        let mut state = setup(&[LDI, 0, 5, LDI, 1, 9, CMP, 0, 1, HLT]);
        state.run().unwrap();
        assert_eq!(state.flag(), RunFlag::Less);

        let mut state = setup(&[LDI, 0, 9, LDI, 1, 5, CMP, 0, 1, HLT]);
        state.run().unwrap();
        assert_eq!(state.flag(), RunFlag::Greater);

        let mut state = setup(&[LDI, 0, 7, LDI, 1, 7, CMP, 0, 1, HLT]);
        state.run().unwrap();
        assert_eq!(state.flag(), RunFlag::Equal);
    }

    #[test]
    fn push_pop_round_trip_restores_stack_pointer() {
        let mut state = setup(&[LDI, 0, 5, PUSH, 0, POP, 1, HLT]);
        state.run().unwrap();
        assert_eq!(state.reg(1), 5);
        assert_eq!(state.reg(7), STACK_INIT);
        assert_eq!(state.mem(STACK_INIT - 1), 5);
    }

    #[test]
    fn stack_grows_downward() {
        let mut state = setup(&[LDI, 0, 1, LDI, 1, 2, PUSH, 0, PUSH, 1, HLT]);
        state.run().unwrap();
        assert_eq!(state.reg(7), STACK_INIT - 2);
        assert_eq!(state.mem(STACK_INIT - 1), 1);
        assert_eq!(state.mem(STACK_INIT - 2), 2);
    }

    #[test]
    fn call_ret_resumes_after_call_site() {
        #[rustfmt::skip]
        let mut state = setup(&[
            LDI, 0, 10,  // 0
            LDI, 1, 12,  // 3: 12 is the subroutine address
            CALL, 1,     // 6: pushes 8
            LDI, 2, 99,  // 8: runs after RET
            HLT,         // 11
            LDI, 3, 55,  // 12: subroutine body
            RET,         // 15
        ]);
        state.run().unwrap();
        assert_eq!(state.reg(2), 99);
        assert_eq!(state.reg(3), 55);
        assert_eq!(state.reg(7), STACK_INIT);
        assert_eq!(state.pc(), 11);
    }

    #[test]
    fn call_pushes_return_address() {
        let mut state = setup(&[LDI, 1, 5, CALL, 1, HLT]);
        state.step().unwrap();
        state.step().unwrap();
        assert_eq!(state.pc(), 5);
        assert_eq!(state.reg(7), STACK_INIT - 1);
        assert_eq!(state.mem(STACK_INIT - 1), 5);
    }

    #[test]
    fn jmp_sets_pc() {
        let mut state = setup(&[LDI, 0, 5, JMP, 0, HLT]);
        state.run().unwrap();
        assert!(state.halted());
        assert_eq!(state.pc(), 5);
    }

    // LDI R0,lhs; LDI R1,rhs; CMP; load the jump target into R2; branch.
    // Falling through loads 99 into R3 and halts at 17, jumping halts at 18.
    fn branch_program(jump_op: u8, lhs: u8, rhs: u8) -> [u8; 19] {
        [
            LDI, 0, lhs,     // 0
            LDI, 1, rhs,     // 3
            CMP, 0, 1,       // 6
            LDI, 2, 18,      // 9
            jump_op, 2,      // 12
            LDI, 3, 99,      // 14
            HLT,             // 17
            HLT,             // 18
        ]
    }

    #[test]
    fn jeq_jumps_on_equal() {
        let mut state = setup(&branch_program(JEQ, 5, 5));
        state.run().unwrap();
        assert_eq!(state.reg(3), 0);
        assert_eq!(state.pc(), 18);
    }

    #[test]
    fn jeq_falls_through_on_less() {
        let mut state = setup(&branch_program(JEQ, 5, 9));
        state.run().unwrap();
        assert_eq!(state.reg(3), 99);
        assert_eq!(state.pc(), 17);
    }

    #[test]
    fn jne_jumps_on_not_equal() {
        let mut state = setup(&branch_program(JNE, 5, 9));
        state.run().unwrap();
        assert_eq!(state.reg(3), 0);
        assert_eq!(state.pc(), 18);
    }

    #[test]
    fn jne_falls_through_on_equal() {
        let mut state = setup(&branch_program(JNE, 5, 5));
        state.run().unwrap();
        assert_eq!(state.reg(3), 99);
        assert_eq!(state.pc(), 17);
    }

    #[test]
    fn jeq_treats_uninit_flags_as_not_equal() {
        let mut state = setup(&[LDI, 0, 10, JEQ, 0, HLT]);
        state.run().unwrap();
        assert_eq!(state.pc(), 5);
    }

    #[test]
    fn unknown_opcode_is_fatal_and_preserves_state() {
        let mut state = setup(&[0b1111_1111]);
        let err = state.run().unwrap_err();
        assert_eq!(
            err,
            RuntimeError::UnknownOpcode {
                opcode: 0b1111_1111,
                pc: 0
            }
        );
        assert!(state.halted());
        assert_eq!(state.pc(), 0);
        for i in 0..7 {
            assert_eq!(state.reg(i), 0);
        }
        assert_eq!(state.reg(7), STACK_INIT);
        assert_eq!(state.mem(0), 0b1111_1111);
        assert_eq!(state.mem(1), 0);
        assert_eq!(state.mem(255), 0);
    }

    #[test]
    fn alu_rejects_unsupported_operations() {
        let mut state = setup(&[HLT]);
        let err = state.alu(0b1010_0001, 0, 1).unwrap_err();
        assert_eq!(
            err,
            RuntimeError::UnsupportedAluOp {
                opcode: 0b1010_0001
            }
        );
    }

    #[test]
    fn register_index_out_of_bounds_is_fatal() {
        let mut state = setup(&[LDI, 8, 1, HLT]);
        let err = state.run().unwrap_err();
        assert_eq!(err, RuntimeError::RegisterOutOfBounds { reg: 8, pc: 0 });
        assert!(state.halted());
    }

    #[test]
    fn halt_at_top_of_memory_runs_clean() {
        let mut raw = [0u8; MEMORY_MAX];
        raw[0] = LDI;
        raw[1] = 0;
        raw[2] = 255;
        raw[3] = JMP;
        raw[4] = 0;
        raw[255] = HLT;
        let mut state = RunState::from_raw(&raw).unwrap();
        state.run().unwrap();
        assert!(state.halted());
        assert_eq!(state.pc(), 255);
    }

    #[test]
    fn oversized_images_are_rejected() {
        assert!(RunState::from_raw(&[0u8; MEMORY_MAX + 1]).is_err());
    }

    #[test]
    fn engine_does_not_resume_after_halt() {
        let mut state = setup(&[HLT, LDI, 0, 1]);
        state.run().unwrap();
        state.run().unwrap();
        assert_eq!(state.reg(0), 0);
        assert_eq!(state.pc(), 0);
    }
}
