pub(crate) mod mem2reg;

pub(crate) use mem2reg::promote_allocas;
pub use mem2reg::{is_alloca_promotable, promote_function, promote_mem_to_reg, AllocaRef};
