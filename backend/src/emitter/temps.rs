use super::TempHandle;
use crate::error::ContractViolation;
use frontend::ast::Type;
use std::collections::{HashMap, HashSet};

/// Stack-discipline scratch storage for one procedure.
#[derive(Debug, Default)]
pub struct TempPool {
  free: Vec<u32>,
  live: HashMap<u32, (u32, Type)>,
  released: HashSet<u32>,
  next_id: u32,
  slots: u32,
}

impl TempPool {
  pub fn new() -> Self {
    TempPool::default()
  }

  pub fn acquire(&mut self, ty: &Type) -> TempHandle {
    let slot = match self.free.pop() {
      Some(slot) => slot,
      None => {
        self.slots += 1;
        self.slots - 1
      }
    };
    let handle = TempHandle {
      id: self.next_id,
      slot,
    };
    self.next_id += 1;
    self.live.insert(handle.id, (slot, ty.clone()));
    handle
  }

  pub fn release(&mut self, handle: TempHandle) -> Result<(), ContractViolation> {
    match self.live.remove(&handle.id) {
      Some((slot, _)) => {
        self.free.push(slot);
        self.released.insert(handle.id);
        Ok(())
      }
      None if self.released.contains(&handle.id) => Err(ContractViolation::DoubleRelease(handle)),
      None => Err(ContractViolation::UnknownTemporary(handle)),
    }
  }

  pub fn outstanding(&self) -> usize {
    self.live.len()
  }

  /// Handles still live with their types, in acquisition order.
  pub fn leaked(&self) -> Vec<(TempHandle, Type)> {
    let mut handles: Vec<(TempHandle, Type)> = self
      .live
      .iter()
      .map(|(id, (slot, ty))| (TempHandle { id: *id, slot: *slot }, ty.clone()))
      .collect();
    handles.sort_by_key(|(handle, _)| handle.id);
    handles
  }

  /// Number of distinct slots the procedure needs.
  pub fn high_water(&self) -> u32 {
    self.slots
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn slots_are_reused_last_in_first_out() {
    let mut pool = TempPool::new();
    let a = pool.acquire(&Type::Integer);
    let b = pool.acquire(&Type::Real);
    assert_eq!((a.slot, b.slot), (0, 1));
    pool.release(b).unwrap();
    let c = pool.acquire(&Type::Logical);
    assert_eq!(c.slot, 1);
    assert_ne!(c, b);
    assert_eq!(pool.leaked(), vec![(a, Type::Integer), (c, Type::Logical)]);
    assert_eq!(pool.high_water(), 2);
  }

  #[test]
  fn double_release_is_rejected() {
    let mut pool = TempPool::new();
    let a = pool.acquire(&Type::Integer);
    pool.release(a).unwrap();
    assert_eq!(pool.release(a), Err(ContractViolation::DoubleRelease(a)));
    // Still rejected after the slot has been handed out again.
    let _b = pool.acquire(&Type::Integer);
    assert_eq!(pool.release(a), Err(ContractViolation::DoubleRelease(a)));
  }

  #[test]
  fn balance_check_finds_leaks() {
    let mut pool = TempPool::new();
    let a = pool.acquire(&Type::Integer);
    let b = pool.acquire(&Type::Integer);
    pool.release(a).unwrap();
    assert_eq!(pool.outstanding(), 1);
    assert_eq!(pool.leaked(), vec![(b, Type::Real)]);
    let stray = TempHandle { id: 99, slot: 0 };
    assert_eq!(pool.release(stray), Err(ContractViolation::UnknownTemporary(stray)));
  }
}
