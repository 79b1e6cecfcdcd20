//! Parser de executáveis ELF32 little-endian (i386).
//!
//! Campo a campo com os helpers de `klib::endian`; nada de structs
//! `packed` sobre o buffer do arquivo.

use crate::klib::endian::{read_u16_le, read_u32_le};

/// Tipos de arquivo ELF aceitos.
pub const ET_EXEC: u16 = 2;
pub const ET_DYN: u16 = 3;

/// i386.
pub const EM_386: u16 = 3;

// Tipos de program header que o loader conhece.
pub const PT_LOAD: u32 = 1;
pub const PT_DYNAMIC: u32 = 2;
pub const PT_INTERP: u32 = 3;

// Flags de segmento.
pub const PF_X: u32 = 1;
pub const PF_W: u32 = 2;
pub const PF_R: u32 = 4;

/// Tag DT_STRTAB da tabela dinâmica.
pub const DT_STRTAB: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfError {
    Truncated,
    BadMagic,
    /// Não é ELF32 little-endian versão 1.
    BadClass,
    BadMachine,
    /// Tipo de arquivo não aceito neste contexto.
    BadType,
    NoEntry,
    NoProgramHeaders,
}

/// Um program header decodificado.
#[derive(Debug, Clone, Copy)]
pub struct Phdr {
    pub p_type: u32,
    pub offset: usize,
    pub vaddr: usize,
    pub filesz: usize,
    pub memsz: usize,
    pub flags: u32,
}

/// Visão validada de um binário ELF32.
pub struct ElfFile<'a> {
    data: &'a [u8],
    entry: usize,
    elf_type: u16,
    phoff: usize,
    phentsize: usize,
    phnum: usize,
}

impl<'a> ElfFile<'a> {
    /// Valida o header. `allow_dyn` libera ET_DYN (interpretadores).
    pub fn parse(data: &'a [u8], allow_dyn: bool) -> Result<Self, ElfError> {
        if data.len() < 52 {
            return Err(ElfError::Truncated);
        }

        if &data[0..4] != b"\x7fELF" {
            return Err(ElfError::BadMagic);
        }
        // class = ELF32, data = little-endian, version = 1
        if data[4] != 1 || data[5] != 1 || data[6] != 1 {
            return Err(ElfError::BadClass);
        }

        let elf_type = read_u16_le(data, 16);
        if elf_type != ET_EXEC && !(allow_dyn && elf_type == ET_DYN) {
            return Err(ElfError::BadType);
        }

        if read_u16_le(data, 18) != EM_386 {
            return Err(ElfError::BadMachine);
        }

        let entry = read_u32_le(data, 24) as usize;
        if entry == 0 {
            return Err(ElfError::NoEntry);
        }

        let phoff = read_u32_le(data, 28) as usize;
        let phentsize = read_u16_le(data, 42) as usize;
        let phnum = read_u16_le(data, 44) as usize;
        if phnum == 0 || phentsize < 32 {
            return Err(ElfError::NoProgramHeaders);
        }
        if phoff + phnum * phentsize > data.len() {
            return Err(ElfError::Truncated);
        }

        Ok(Self {
            data,
            entry,
            elf_type,
            phoff,
            phentsize,
            phnum,
        })
    }

    pub fn entry(&self) -> usize {
        self.entry
    }

    pub fn elf_type(&self) -> u16 {
        self.elf_type
    }

    pub fn phnum(&self) -> usize {
        self.phnum
    }

    pub fn phdr(&self, index: usize) -> Result<Phdr, ElfError> {
        if index >= self.phnum {
            return Err(ElfError::Truncated);
        }
        let base = self.phoff + index * self.phentsize;
        let d = self.data;

        Ok(Phdr {
            p_type: read_u32_le(d, base),
            offset: read_u32_le(d, base + 4) as usize,
            vaddr: read_u32_le(d, base + 8) as usize,
            filesz: read_u32_le(d, base + 16) as usize,
            memsz: read_u32_le(d, base + 20) as usize,
            flags: read_u32_le(d, base + 24),
        })
    }

    /// Bytes de um segmento no arquivo.
    pub fn segment_data(&self, ph: &Phdr) -> Result<&'a [u8], ElfError> {
        self.data
            .get(ph.offset..ph.offset + ph.filesz)
            .ok_or(ElfError::Truncated)
    }

    /// Varre PT_DYNAMIC atrás do ponteiro da string table dinâmica.
    pub fn dynamic_strtab(&self, ph: &Phdr) -> Option<u32> {
        let data = self.segment_data(ph).ok()?;
        let mut off = 0;
        while off + 8 <= data.len() {
            let tag = read_u32_le(data, off);
            let val = read_u32_le(data, off + 4);
            if tag == 0 {
                break;
            }
            if tag == DT_STRTAB {
                return Some(val);
            }
            off += 8;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Header ELF32 i386 mínimo com um PT_LOAD.
    fn minimal_elf(elf_type: u16, machine: u16, entry: u32) -> [u8; 84] {
        let mut e = [0u8; 84];
        e[0..4].copy_from_slice(b"\x7fELF");
        e[4] = 1; // ELF32
        e[5] = 1; // little-endian
        e[6] = 1; // versão
        e[16..18].copy_from_slice(&elf_type.to_le_bytes());
        e[18..20].copy_from_slice(&machine.to_le_bytes());
        e[24..28].copy_from_slice(&entry.to_le_bytes());
        e[28..32].copy_from_slice(&52u32.to_le_bytes()); // phoff
        e[42..44].copy_from_slice(&32u16.to_le_bytes()); // phentsize
        e[44..46].copy_from_slice(&1u16.to_le_bytes()); // phnum

        // PT_LOAD em 0x08048000, 0x100 bytes de arquivo, 0x200 na
        // memória, RX.
        e[52..56].copy_from_slice(&PT_LOAD.to_le_bytes());
        e[60..64].copy_from_slice(&0x0804_8000u32.to_le_bytes());
        e[68..72].copy_from_slice(&0x100u32.to_le_bytes());
        e[72..76].copy_from_slice(&0x200u32.to_le_bytes());
        e[76..80].copy_from_slice(&(PF_R | PF_X).to_le_bytes());
        e
    }

    #[test]
    fn parse_valido() {
        let data = minimal_elf(ET_EXEC, EM_386, 0x0804_8000);
        let elf = ElfFile::parse(&data, false).unwrap();
        assert_eq!(elf.entry(), 0x0804_8000);
        assert_eq!(elf.phnum(), 1);

        let ph = elf.phdr(0).unwrap();
        assert_eq!(ph.p_type, PT_LOAD);
        assert_eq!(ph.vaddr, 0x0804_8000);
        assert_eq!(ph.memsz, 0x200);
        assert_eq!(ph.flags, PF_R | PF_X);
    }

    #[test]
    fn rejeita_magic_e_arch() {
        let mut data = minimal_elf(ET_EXEC, EM_386, 0x1000);
        data[0] = 0x7E;
        assert!(matches!(
            ElfFile::parse(&data, false),
            Err(ElfError::BadMagic)
        ));

        let data = minimal_elf(ET_EXEC, 62, 0x1000); // x86_64
        assert!(matches!(
            ElfFile::parse(&data, false),
            Err(ElfError::BadMachine)
        ));

        let data = minimal_elf(ET_DYN, EM_386, 0x1000);
        assert!(matches!(
            ElfFile::parse(&data, false),
            Err(ElfError::BadType)
        ));
        assert!(ElfFile::parse(&data, true).is_ok());

        let data = minimal_elf(ET_EXEC, EM_386, 0);
        assert!(matches!(
            ElfFile::parse(&data, false),
            Err(ElfError::NoEntry)
        ));
    }
}
