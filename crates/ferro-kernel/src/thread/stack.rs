use crate::error::{Error, Result};

/// A thread stack.
///
/// Host threads run on stacks the host gives them; this is the kernel's
/// record of the region, sized the way the host thread is sized.
pub struct Stack {
    memory: Box<[u8]>,
}

impl Stack {
    pub fn allocate(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidArgument);
        }
        let mut memory = Vec::new();
        memory
            .try_reserve_exact(size)
            .map_err(|_| Error::TemporaryOutage)?;
        memory.resize(size, 0);
        Ok(Self {
            memory: memory.into_boxed_slice(),
        })
    }

    pub fn size(&self) -> usize {
        self.memory.len()
    }
}

impl std::fmt::Debug for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stack").field("size", &self.size()).finish()
    }
}
