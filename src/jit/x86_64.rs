//! x86-64 instruction encoding.
//!
//! Encodes the subset of x86-64 the lowering needs: 64-bit moves and ALU
//! operations on boxed values, 32-bit arithmetic on unboxed ints, SSE2
//! scalar doubles and rel32 branches. Uses System V AMD64 ABI conventions.

use super::codebuf::CodeBuffer;

/// x86-64 general-purpose registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reg {
    Rax = 0, // Return value
    Rcx = 1, // 4th argument
    Rdx = 2, // 3rd argument
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6, // 2nd argument
    Rdi = 7, // 1st argument
    R8 = 8,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Reg {
    /// Get the register code (lower 3 bits).
    pub fn code(self) -> u8 {
        (self as u8) & 0x7
    }

    /// Check if this register requires REX.B or REX.R extension.
    pub fn needs_rex_ext(self) -> bool {
        (self as u8) >= 8
    }

    /// Get the REX.B bit for this register (when used as base/rm).
    pub fn rex_b(self) -> u8 {
        if self.needs_rex_ext() { 0x01 } else { 0x00 }
    }

    /// Get the REX.R bit for this register (when used as reg).
    pub fn rex_r(self) -> u8 {
        if self.needs_rex_ext() { 0x04 } else { 0x00 }
    }
}

/// XMM register number.
pub type Xmm = u8;

/// x86-64 condition codes (for Jcc).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Cond {
    O = 0x0,  // Overflow
    B = 0x2,  // Below (unsigned <)
    Ae = 0x3, // Above or equal (unsigned >=)
    E = 0x4,  // Equal
    Ne = 0x5, // Not equal
    Be = 0x6, // Below or equal (unsigned <=)
    A = 0x7,  // Above (unsigned >)
    S = 0x8,  // Sign (negative)
    P = 0xA,  // Parity even (unordered after UCOMISD)
    L = 0xC,  // Less (signed <)
    Ge = 0xD, // Greater or equal (signed >=)
    Le = 0xE, // Less or equal (signed <=)
    G = 0xF,  // Greater (signed >)
}

/// ALU opcodes sharing the `00 /r`, `81 /n id`, `83 /n ib` encoding family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Or,
    And,
    Sub,
    Xor,
    Cmp,
}

impl AluOp {
    /// `op r/m, r` opcode.
    fn rm_r(self) -> u8 {
        match self {
            AluOp::Add => 0x01,
            AluOp::Or => 0x09,
            AluOp::And => 0x21,
            AluOp::Sub => 0x29,
            AluOp::Xor => 0x31,
            AluOp::Cmp => 0x39,
        }
    }

    /// ModR/M reg field of the immediate forms.
    fn ext(self) -> u8 {
        match self {
            AluOp::Add => 0,
            AluOp::Or => 1,
            AluOp::And => 4,
            AluOp::Sub => 5,
            AluOp::Xor => 6,
            AluOp::Cmp => 7,
        }
    }
}

/// Shift opcodes (`C1 /n ib`, `D3 /n`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftOp {
    Shl,
    Shr,
    Sar,
}

impl ShiftOp {
    fn ext(self) -> u8 {
        match self {
            ShiftOp::Shl => 4,
            ShiftOp::Shr => 5,
            ShiftOp::Sar => 7,
        }
    }
}

/// Operand width of an integer instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    W32,
    W64,
}

/// x86-64 assembler.
pub struct X86_64Assembler<'a> {
    buf: &'a mut CodeBuffer,
}

impl<'a> X86_64Assembler<'a> {
    pub fn new(buf: &'a mut CodeBuffer) -> Self {
        Self { buf }
    }

    pub fn offset(&self) -> usize {
        self.buf.offset()
    }

    /// Bind `label` to the current offset.
    pub fn bind_label(&mut self, label: usize) {
        self.buf.define_label(label);
    }

    // ==================== REX prefix helpers ====================

    /// Emit REX (with W for 64-bit) when required.
    fn emit_rex(&mut self, width: Width, reg: Reg, rm: Reg) {
        let w = if width == Width::W64 { 0x08 } else { 0x00 };
        let rex = 0x40 | w | reg.rex_r() | rm.rex_b();
        if rex != 0x40 {
            self.buf.emit_u8(rex);
        }
    }

    // ==================== ModR/M helpers ====================

    /// Encode ModR/M byte.
    /// mod: 2 bits, reg: 3 bits, rm: 3 bits
    fn modrm(mode: u8, reg: u8, rm: u8) -> u8 {
        ((mode & 0x3) << 6) | ((reg & 0x7) << 3) | (rm & 0x7)
    }

    /// ModR/M (and SIB) for `[base + disp]`.
    fn emit_mem(&mut self, reg: u8, base: Reg, disp: i32) {
        let needs_sib = base == Reg::Rsp || base == Reg::R12;
        // RBP/R13 have no disp-less form.
        let mode = if disp == 0 && base != Reg::Rbp && base != Reg::R13 {
            0b00
        } else if (-128..=127).contains(&disp) {
            0b01
        } else {
            0b10
        };
        if needs_sib {
            self.buf.emit_u8(Self::modrm(mode, reg, 0b100));
            self.buf.emit_u8(0x24);
        } else {
            self.buf.emit_u8(Self::modrm(mode, reg, base.code()));
        }
        match mode {
            0b01 => self.buf.emit_u8(disp as u8),
            0b10 => self.buf.emit_u32(disp as u32),
            _ => {}
        }
    }

    // ==================== Data Movement ====================

    /// MOV r64, r64 (register to register)
    pub fn mov_rr(&mut self, dst: Reg, src: Reg) {
        self.emit_rex(Width::W64, src, dst);
        self.buf.emit_u8(0x89); // MOV r/m64, r64
        self.buf.emit_u8(Self::modrm(0b11, src.code(), dst.code()));
    }

    /// MOV r32, r32 (zero-extends to 64-bit)
    pub fn mov_r32_r32(&mut self, dst: Reg, src: Reg) {
        self.emit_rex(Width::W32, src, dst);
        self.buf.emit_u8(0x89); // MOV r/m32, r32
        self.buf.emit_u8(Self::modrm(0b11, src.code(), dst.code()));
    }

    /// MOV r64, imm64 (move 64-bit immediate to register)
    pub fn mov_ri64(&mut self, dst: Reg, imm: u64) {
        self.emit_rex(Width::W64, Reg::Rax, dst);
        self.buf.emit_u8(0xB8 + dst.code()); // MOV r64, imm64
        self.buf.emit_u64(imm);
    }

    /// MOV r32, imm32 (zero-extends to 64-bit)
    pub fn mov_r32_imm32(&mut self, dst: Reg, imm: i32) {
        self.emit_rex(Width::W32, Reg::Rax, dst);
        self.buf.emit_u8(0xB8 + dst.code()); // MOV r32, imm32
        self.buf.emit_u32(imm as u32);
    }

    /// MOV r64, [base + disp] (load from memory)
    pub fn mov_rm(&mut self, dst: Reg, base: Reg, disp: i32) {
        self.emit_rex(Width::W64, dst, base);
        self.buf.emit_u8(0x8B); // MOV r64, r/m64
        self.emit_mem(dst.code(), base, disp);
    }

    /// MOV r32, [base + disp] (zero-extending load)
    pub fn mov_r32_m32(&mut self, dst: Reg, base: Reg, disp: i32) {
        self.emit_rex(Width::W32, dst, base);
        self.buf.emit_u8(0x8B); // MOV r32, r/m32
        self.emit_mem(dst.code(), base, disp);
    }

    /// MOVZX r32, WORD PTR [base + disp]
    pub fn movzx_r32_m16(&mut self, dst: Reg, base: Reg, disp: i32) {
        self.emit_rex(Width::W32, dst, base);
        self.buf.emit_u8(0x0F);
        self.buf.emit_u8(0xB7); // MOVZX r32, r/m16
        self.emit_mem(dst.code(), base, disp);
    }

    /// MOV [base + disp], r64 (store to memory)
    pub fn mov_mr(&mut self, base: Reg, disp: i32, src: Reg) {
        self.emit_rex(Width::W64, src, base);
        self.buf.emit_u8(0x89); // MOV r/m64, r64
        self.emit_mem(src.code(), base, disp);
    }

    // ==================== Integer ALU ====================

    /// op r, r
    pub fn alu_rr(&mut self, op: AluOp, width: Width, dst: Reg, src: Reg) {
        self.emit_rex(width, src, dst);
        self.buf.emit_u8(op.rm_r());
        self.buf.emit_u8(Self::modrm(0b11, src.code(), dst.code()));
    }

    /// op r, imm (sign-extended in 64-bit form)
    pub fn alu_ri(&mut self, op: AluOp, width: Width, dst: Reg, imm: i32) {
        self.emit_rex(width, Reg::Rax, dst);
        if (-128..=127).contains(&imm) {
            self.buf.emit_u8(0x83); // op r/m, imm8
            self.buf.emit_u8(Self::modrm(0b11, op.ext(), dst.code()));
            self.buf.emit_u8(imm as u8);
        } else {
            self.buf.emit_u8(0x81); // op r/m, imm32
            self.buf.emit_u8(Self::modrm(0b11, op.ext(), dst.code()));
            self.buf.emit_u32(imm as u32);
        }
    }

    /// op DWORD PTR [base + disp], imm8
    pub fn alu_m32_imm8(&mut self, op: AluOp, base: Reg, disp: i32, imm: i8) {
        self.emit_rex(Width::W32, Reg::Rax, base);
        self.buf.emit_u8(0x83);
        self.emit_mem(op.ext(), base, disp);
        self.buf.emit_u8(imm as u8);
    }

    /// IMUL r32, r32
    pub fn imul_rr32(&mut self, dst: Reg, src: Reg) {
        self.emit_rex(Width::W32, dst, src);
        self.buf.emit_u8(0x0F);
        self.buf.emit_u8(0xAF); // IMUL r32, r/m32
        self.buf.emit_u8(Self::modrm(0b11, dst.code(), src.code()));
    }

    /// IMUL r32, r32, imm
    pub fn imul_rri32(&mut self, dst: Reg, src: Reg, imm: i32) {
        self.emit_rex(Width::W32, dst, src);
        if (-128..=127).contains(&imm) {
            self.buf.emit_u8(0x6B); // IMUL r32, r/m32, imm8
            self.buf.emit_u8(Self::modrm(0b11, dst.code(), src.code()));
            self.buf.emit_u8(imm as u8);
        } else {
            self.buf.emit_u8(0x69); // IMUL r32, r/m32, imm32
            self.buf.emit_u8(Self::modrm(0b11, dst.code(), src.code()));
            self.buf.emit_u32(imm as u32);
        }
    }

    /// IDIV r32 (signed divide EDX:EAX, quotient in EAX, remainder in EDX)
    pub fn idiv32(&mut self, src: Reg) {
        self.emit_rex(Width::W32, Reg::Rax, src);
        self.buf.emit_u8(0xF7); // IDIV r/m32
        self.buf.emit_u8(Self::modrm(0b11, 7, src.code()));
    }

    /// CDQ (sign-extend EAX into EDX:EAX, needed before IDIV)
    pub fn cdq(&mut self) {
        self.buf.emit_u8(0x99);
    }

    /// NEG r32
    pub fn neg32(&mut self, dst: Reg) {
        self.emit_rex(Width::W32, Reg::Rax, dst);
        self.buf.emit_u8(0xF7); // NEG r/m32
        self.buf.emit_u8(Self::modrm(0b11, 3, dst.code()));
    }

    /// TEST r, r
    pub fn test_rr(&mut self, width: Width, dst: Reg, src: Reg) {
        self.emit_rex(width, src, dst);
        self.buf.emit_u8(0x85); // TEST r/m, r
        self.buf.emit_u8(Self::modrm(0b11, src.code(), dst.code()));
    }

    /// TEST r, imm32 (sign-extended in 64-bit form)
    pub fn test_ri(&mut self, width: Width, dst: Reg, imm: i32) {
        self.emit_rex(width, Reg::Rax, dst);
        self.buf.emit_u8(0xF7); // TEST r/m, imm32
        self.buf.emit_u8(Self::modrm(0b11, 0, dst.code()));
        self.buf.emit_u32(imm as u32);
    }

    /// SHL/SHR/SAR r32, imm8
    pub fn shift32_ri(&mut self, op: ShiftOp, dst: Reg, imm: u8) {
        self.emit_rex(Width::W32, Reg::Rax, dst);
        self.buf.emit_u8(0xC1);
        self.buf.emit_u8(Self::modrm(0b11, op.ext(), dst.code()));
        self.buf.emit_u8(imm);
    }

    /// SHL/SHR/SAR r32, CL
    pub fn shift32_cl(&mut self, op: ShiftOp, dst: Reg) {
        self.emit_rex(Width::W32, Reg::Rax, dst);
        self.buf.emit_u8(0xD3);
        self.buf.emit_u8(Self::modrm(0b11, op.ext(), dst.code()));
    }

    // ==================== Stack Operations ====================

    /// PUSH r64
    pub fn push(&mut self, reg: Reg) {
        if reg.needs_rex_ext() {
            self.buf.emit_u8(0x41); // REX.B
        }
        self.buf.emit_u8(0x50 + reg.code());
    }

    /// POP r64
    pub fn pop(&mut self, reg: Reg) {
        if reg.needs_rex_ext() {
            self.buf.emit_u8(0x41); // REX.B
        }
        self.buf.emit_u8(0x58 + reg.code());
    }

    // ==================== Control Flow ====================

    /// JMP rel32 to a label
    pub fn jmp_label(&mut self, label: usize) {
        self.buf.emit_u8(0xE9);
        self.buf.emit_forward_ref(label);
    }

    /// Jcc rel32 to a label
    pub fn jcc_label(&mut self, cond: Cond, label: usize) {
        self.buf.emit_u8(0x0F);
        self.buf.emit_u8(0x80 + cond as u8);
        self.buf.emit_forward_ref(label);
    }

    /// Jcc rel8 (conditional short jump)
    pub fn jcc_rel8(&mut self, cond: Cond, offset: i8) {
        self.buf.emit_u8(0x70 + cond as u8);
        self.buf.emit_u8(offset as u8);
    }

    /// CALL r64 (indirect call through register)
    pub fn call_r(&mut self, reg: Reg) {
        if reg.needs_rex_ext() {
            self.buf.emit_u8(0x41); // REX.B
        }
        self.buf.emit_u8(0xFF); // CALL r/m64
        self.buf.emit_u8(Self::modrm(0b11, 2, reg.code()));
    }

    pub fn ret(&mut self) {
        self.buf.emit_u8(0xC3);
    }

    // ==================== SSE2 Floating Point ====================

    /// MOVQ xmm, r64 (move quadword from GP register to XMM)
    pub fn movq_xmm_r64(&mut self, xmm: Xmm, src: Reg) {
        // 66 REX.W 0F 6E /r
        self.buf.emit_u8(0x66);
        self.buf.emit_u8(0x48 | src.rex_b());
        self.buf.emit_u8(0x0F);
        self.buf.emit_u8(0x6E);
        self.buf.emit_u8(Self::modrm(0b11, xmm, src.code()));
    }

    /// MOVQ r64, xmm (move quadword from XMM to GP register)
    pub fn movq_r64_xmm(&mut self, dst: Reg, xmm: Xmm) {
        // 66 REX.W 0F 7E /r
        self.buf.emit_u8(0x66);
        self.buf.emit_u8(0x48 | dst.rex_b());
        self.buf.emit_u8(0x0F);
        self.buf.emit_u8(0x7E);
        self.buf.emit_u8(Self::modrm(0b11, xmm, dst.code()));
    }

    fn sse_rr(&mut self, prefix: u8, opcode: u8, dst: Xmm, src: Xmm) {
        self.buf.emit_u8(prefix);
        self.buf.emit_u8(0x0F);
        self.buf.emit_u8(opcode);
        self.buf.emit_u8(Self::modrm(0b11, dst, src));
    }

    /// ADDSD xmm1, xmm2
    pub fn addsd(&mut self, dst: Xmm, src: Xmm) {
        self.sse_rr(0xF2, 0x58, dst, src);
    }

    /// SUBSD xmm1, xmm2
    pub fn subsd(&mut self, dst: Xmm, src: Xmm) {
        self.sse_rr(0xF2, 0x5C, dst, src);
    }

    /// MULSD xmm1, xmm2
    pub fn mulsd(&mut self, dst: Xmm, src: Xmm) {
        self.sse_rr(0xF2, 0x59, dst, src);
    }

    /// DIVSD xmm1, xmm2
    pub fn divsd(&mut self, dst: Xmm, src: Xmm) {
        self.sse_rr(0xF2, 0x5E, dst, src);
    }

    /// UCOMISD xmm1, xmm2 (compare and set ZF/PF/CF)
    pub fn ucomisd(&mut self, xmm1: Xmm, xmm2: Xmm) {
        self.sse_rr(0x66, 0x2E, xmm1, xmm2);
    }

    /// CVTSI2SD xmm, r32
    pub fn cvtsi2sd_xmm_r32(&mut self, xmm: Xmm, src: Reg) {
        // F2 [REX.B] 0F 2A /r
        self.buf.emit_u8(0xF2);
        if src.needs_rex_ext() {
            self.buf.emit_u8(0x41);
        }
        self.buf.emit_u8(0x0F);
        self.buf.emit_u8(0x2A);
        self.buf.emit_u8(Self::modrm(0b11, xmm, src.code()));
    }

    /// CVTTSD2SI r32, xmm (truncating; 0x80000000 when out of range)
    pub fn cvttsd2si_r32_xmm(&mut self, dst: Reg, xmm: Xmm) {
        // F2 [REX.R] 0F 2C /r
        self.buf.emit_u8(0xF2);
        if dst.needs_rex_ext() {
            self.buf.emit_u8(0x44);
        }
        self.buf.emit_u8(0x0F);
        self.buf.emit_u8(0x2C);
        self.buf.emit_u8(Self::modrm(0b11, dst.code(), xmm));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assemble(f: impl FnOnce(&mut X86_64Assembler)) -> Vec<u8> {
        let mut buf = CodeBuffer::default();
        let mut asm = X86_64Assembler::new(&mut buf);
        f(&mut asm);
        buf.finalize().unwrap()
    }

    #[test]
    fn test_mov_rr() {
        // MOV RDI, RAX = 48 89 C7
        assert_eq!(assemble(|a| a.mov_rr(Reg::Rdi, Reg::Rax)), [0x48, 0x89, 0xC7]);
    }

    #[test]
    fn test_mov_ri64_r14() {
        // MOV R14, 0xFFFF000000000000 = 49 BE 00 00 00 00 00 00 FF FF
        assert_eq!(
            assemble(|a| a.mov_ri64(Reg::R14, 0xFFFF_0000_0000_0000)),
            [0x49, 0xBE, 0, 0, 0, 0, 0, 0, 0xFF, 0xFF]
        );
    }

    #[test]
    fn test_mov_r32_imm32() {
        // MOV EDX, 7 = BA 07 00 00 00
        assert_eq!(assemble(|a| a.mov_r32_imm32(Reg::Rdx, 7)), [0xBA, 7, 0, 0, 0]);
        // MOV R8D, -1 = 41 B8 FF FF FF FF
        assert_eq!(
            assemble(|a| a.mov_r32_imm32(Reg::R8, -1)),
            [0x41, 0xB8, 0xFF, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn test_mov_rm_r13_base() {
        // MOV RAX, [R13] needs a disp8 = 49 8B 45 00
        assert_eq!(assemble(|a| a.mov_rm(Reg::Rax, Reg::R13, 0)), [0x49, 0x8B, 0x45, 0x00]);
        // MOV RDX, [R13+16] = 49 8B 55 10
        assert_eq!(assemble(|a| a.mov_rm(Reg::Rdx, Reg::R13, 16)), [0x49, 0x8B, 0x55, 0x10]);
    }

    #[test]
    fn test_mov_mr_disp32() {
        // MOV [R13+0x400], RAX = 49 89 85 00 04 00 00
        assert_eq!(
            assemble(|a| a.mov_mr(Reg::R13, 0x400, Reg::Rax)),
            [0x49, 0x89, 0x85, 0x00, 0x04, 0x00, 0x00]
        );
    }

    #[test]
    fn test_loads_32_and_16() {
        // MOV EDX, [RAX] = 8B 10
        assert_eq!(assemble(|a| a.mov_r32_m32(Reg::Rdx, Reg::Rax, 0)), [0x8B, 0x10]);
        // MOVZX EAX, WORD PTR [RDX] = 0F B7 02
        assert_eq!(assemble(|a| a.movzx_r32_m16(Reg::Rax, Reg::Rdx, 0)), [0x0F, 0xB7, 0x02]);
    }

    #[test]
    fn test_alu_rr() {
        // ADD RAX, R14 = 4C 01 F0
        assert_eq!(
            assemble(|a| a.alu_rr(AluOp::Add, Width::W64, Reg::Rax, Reg::R14)),
            [0x4C, 0x01, 0xF0]
        );
        // OR RAX, R14 = 4C 09 F0
        assert_eq!(
            assemble(|a| a.alu_rr(AluOp::Or, Width::W64, Reg::Rax, Reg::R14)),
            [0x4C, 0x09, 0xF0]
        );
        // SUB EAX, EDX = 29 D0
        assert_eq!(
            assemble(|a| a.alu_rr(AluOp::Sub, Width::W32, Reg::Rax, Reg::Rdx)),
            [0x29, 0xD0]
        );
        // CMP RAX, R14 = 4C 39 F0
        assert_eq!(
            assemble(|a| a.alu_rr(AluOp::Cmp, Width::W64, Reg::Rax, Reg::R14)),
            [0x4C, 0x39, 0xF0]
        );
    }

    #[test]
    fn test_alu_ri() {
        // ADD EAX, 1 = 83 C0 01
        assert_eq!(
            assemble(|a| a.alu_ri(AluOp::Add, Width::W32, Reg::Rax, 1)),
            [0x83, 0xC0, 0x01]
        );
        // CMP EAX, 0x80000000 = 81 F8 00 00 00 80
        assert_eq!(
            assemble(|a| a.alu_ri(AluOp::Cmp, Width::W32, Reg::Rax, i32::MIN)),
            [0x81, 0xF8, 0x00, 0x00, 0x00, 0x80]
        );
        // AND RAX, 256 = 48 81 E0 00 01 00 00
        assert_eq!(
            assemble(|a| a.alu_ri(AluOp::And, Width::W64, Reg::Rax, 256)),
            [0x48, 0x81, 0xE0, 0x00, 0x01, 0x00, 0x00]
        );
    }

    #[test]
    fn test_counter_increment() {
        // CMP DWORD PTR [R11], -1 = 41 83 3B FF
        assert_eq!(
            assemble(|a| a.alu_m32_imm8(AluOp::Cmp, Reg::R11, 0, -1)),
            [0x41, 0x83, 0x3B, 0xFF]
        );
        // ADD DWORD PTR [R11], 1 = 41 83 03 01
        assert_eq!(
            assemble(|a| a.alu_m32_imm8(AluOp::Add, Reg::R11, 0, 1)),
            [0x41, 0x83, 0x03, 0x01]
        );
    }

    #[test]
    fn test_imul32() {
        // IMUL EAX, EDX = 0F AF C2
        assert_eq!(assemble(|a| a.imul_rr32(Reg::Rax, Reg::Rdx)), [0x0F, 0xAF, 0xC2]);
        // IMUL EDX, EDX, 3 = 6B D2 03
        assert_eq!(assemble(|a| a.imul_rri32(Reg::Rdx, Reg::Rdx, 3)), [0x6B, 0xD2, 0x03]);
    }

    #[test]
    fn test_idiv32() {
        // CDQ; IDIV ECX = 99 F7 F9
        assert_eq!(
            assemble(|a| {
                a.cdq();
                a.idiv32(Reg::Rcx);
            }),
            [0x99, 0xF7, 0xF9]
        );
    }

    #[test]
    fn test_neg32_and_shifts() {
        // NEG EAX = F7 D8
        assert_eq!(assemble(|a| a.neg32(Reg::Rax)), [0xF7, 0xD8]);
        // SHL EAX, 3 = C1 E0 03
        assert_eq!(assemble(|a| a.shift32_ri(ShiftOp::Shl, Reg::Rax, 3)), [0xC1, 0xE0, 0x03]);
        // SAR EAX, CL = D3 F8
        assert_eq!(assemble(|a| a.shift32_cl(ShiftOp::Sar, Reg::Rax)), [0xD3, 0xF8]);
        // SHR EAX, CL = D3 E8
        assert_eq!(assemble(|a| a.shift32_cl(ShiftOp::Shr, Reg::Rax)), [0xD3, 0xE8]);
    }

    #[test]
    fn test_test_forms() {
        // TEST RAX, R15 = 4C 85 F8
        assert_eq!(
            assemble(|a| a.test_rr(Width::W64, Reg::Rax, Reg::R15)),
            [0x4C, 0x85, 0xF8]
        );
        // TEST EAX, 0x7FFFFFFF = F7 C0 FF FF FF 7F
        assert_eq!(
            assemble(|a| a.test_ri(Width::W32, Reg::Rax, 0x7fff_ffff)),
            [0xF7, 0xC0, 0xFF, 0xFF, 0xFF, 0x7F]
        );
    }

    #[test]
    fn test_push_pop() {
        assert_eq!(
            assemble(|a| {
                a.push(Reg::Rbp);
                a.push(Reg::R13);
                a.pop(Reg::R13);
                a.pop(Reg::Rbp);
            }),
            [0x55, 0x41, 0x55, 0x41, 0x5D, 0x5D]
        );
    }

    #[test]
    fn test_call_r_and_ret() {
        // CALL RAX = FF D0; RET = C3
        assert_eq!(
            assemble(|a| {
                a.call_r(Reg::Rax);
                a.ret();
            }),
            [0xFF, 0xD0, 0xC3]
        );
    }

    #[test]
    fn test_jcc_label() {
        let mut buf = CodeBuffer::default();
        let mut asm = X86_64Assembler::new(&mut buf);
        asm.jcc_label(Cond::O, 1);
        buf.define_label(1);
        // JO rel32 +0 = 0F 80 00 00 00 00
        assert_eq!(buf.finalize().unwrap(), [0x0F, 0x80, 0, 0, 0, 0]);
    }

    #[test]
    fn test_jcc_rel8() {
        // JE +4 = 74 04
        assert_eq!(assemble(|a| a.jcc_rel8(Cond::E, 4)), [0x74, 0x04]);
    }

    #[test]
    fn test_movq() {
        // MOVQ XMM0, RAX = 66 48 0F 6E C0
        assert_eq!(assemble(|a| a.movq_xmm_r64(0, Reg::Rax)), [0x66, 0x48, 0x0F, 0x6E, 0xC0]);
        // MOVQ RAX, XMM1 = 66 48 0F 7E C8
        assert_eq!(assemble(|a| a.movq_r64_xmm(Reg::Rax, 1)), [0x66, 0x48, 0x0F, 0x7E, 0xC8]);
    }

    #[test]
    fn test_sse_arith() {
        // ADDSD XMM1, XMM2 = F2 0F 58 CA
        assert_eq!(assemble(|a| a.addsd(1, 2)), [0xF2, 0x0F, 0x58, 0xCA]);
        // DIVSD XMM0, XMM1 = F2 0F 5E C1
        assert_eq!(assemble(|a| a.divsd(0, 1)), [0xF2, 0x0F, 0x5E, 0xC1]);
        // UCOMISD XMM1, XMM0 = 66 0F 2E C8
        assert_eq!(assemble(|a| a.ucomisd(1, 0)), [0x66, 0x0F, 0x2E, 0xC8]);
    }

    #[test]
    fn test_conversions() {
        // CVTSI2SD XMM1, EDX = F2 0F 2A CA
        assert_eq!(assemble(|a| a.cvtsi2sd_xmm_r32(1, Reg::Rdx)), [0xF2, 0x0F, 0x2A, 0xCA]);
        // CVTSI2SD XMM0, R8D = F2 41 0F 2A C0
        assert_eq!(
            assemble(|a| a.cvtsi2sd_xmm_r32(0, Reg::R8)),
            [0xF2, 0x41, 0x0F, 0x2A, 0xC0]
        );
        // CVTTSD2SI EAX, XMM0 = F2 0F 2C C0
        assert_eq!(assemble(|a| a.cvttsd2si_r32_xmm(Reg::Rax, 0)), [0xF2, 0x0F, 0x2C, 0xC0]);
    }
}
