//! Typed list operations.
//!
//! Elements compare by dtype, dims and elementwise `==`: `0.0` equals `-0.0` and NaN never
//! equals anything.
//! Copying and in-place variants compute the same value; the executor enforces that a consumed
//! list is not read again.

use tgraph_rs::backend::shape_helpers::normalize_index;
use tgraph_rs::backend::spec::{BackendError, BackendResult, ListIndex, Operation};

use crate::cpu::{operand_index, operand_tensor, resolve_scalar, slice_positions, CpuTensor, CpuValue};

pub(crate) fn execute(op: &Operation, inputs: &[CpuValue]) -> BackendResult<CpuValue> {
    let list = || operand_list(inputs, 0);
    let value = match op {
        Operation::MakeList => CpuValue::List(
            (0..inputs.len())
                .map(|index| operand_tensor(inputs, index).cloned())
                .collect::<BackendResult<_>>()?,
        ),
        Operation::ListGetItem(ListIndex::Scalar(scalar)) => {
            let items = list()?;
            let index = resolve_scalar(inputs, *scalar)?;
            let pos = normalize_index(index, items.len())
                .ok_or_else(|| BackendError::execution("list index out of range"))?;
            CpuValue::Tensor(items[pos].clone())
        }
        Operation::ListGetItem(ListIndex::Slice(slice)) => {
            let items = list()?;
            let picked = slice_positions(inputs, slice, items.len())?;
            CpuValue::List(picked.into_iter().map(|pos| items[pos].clone()).collect())
        }
        Operation::ListLength => CpuValue::Tensor(CpuTensor::scalar_i64(list()?.len() as i64)),
        Operation::ListAppend { .. } => {
            let mut items = list()?.to_vec();
            items.push(operand_tensor(inputs, 1)?.clone());
            CpuValue::List(items)
        }
        Operation::ListExtend { .. } => {
            let mut items = list()?.to_vec();
            items.extend_from_slice(operand_list(inputs, 1)?);
            CpuValue::List(items)
        }
        Operation::ListInsert { .. } => {
            let mut items = list()?.to_vec();
            let pos = insert_position(operand_index(inputs, 1)?, items.len());
            items.insert(pos, operand_tensor(inputs, 2)?.clone());
            CpuValue::List(items)
        }
        Operation::ListRemove { .. } => {
            let mut items = list()?.to_vec();
            let needle = operand_tensor(inputs, 1)?;
            if let Some(pos) = items.iter().position(|item| item == needle) {
                items.remove(pos);
            }
            CpuValue::List(items)
        }
        Operation::ListReverse { .. } => {
            let mut items = list()?.to_vec();
            items.reverse();
            CpuValue::List(items)
        }
        Operation::ListIndexOf => {
            let needle = operand_tensor(inputs, 1)?;
            let pos = list()?
                .iter()
                .position(|item| item == needle)
                .ok_or_else(|| BackendError::execution("tensor is not in list"))?;
            CpuValue::Tensor(CpuTensor::scalar_i64(pos as i64))
        }
        Operation::ListCount => {
            let needle = operand_tensor(inputs, 1)?;
            let count = list()?.iter().filter(|item| *item == needle).count();
            CpuValue::Tensor(CpuTensor::scalar_i64(count as i64))
        }
        other => {
            return Err(BackendError::unimplemented(
                other.name(),
                "not a list operation",
            ))
        }
    };
    Ok(value)
}

fn operand_list(inputs: &[CpuValue], index: usize) -> BackendResult<&[CpuTensor]> {
    inputs
        .get(index)
        .ok_or_else(|| BackendError::execution(format!("missing operand {index}")))?
        .as_list()
}

/// Insertion point with Python `list.insert` clamping.
fn insert_position(index: i64, len: usize) -> usize {
    let len = len as i64;
    let pos = if index < 0 { index + len } else { index };
    pos.clamp(0, len) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::TensorData;
    use tgraph_rs::backend::spec::DType;

    #[test]
    fn insert_position_clamps_like_python() {
        assert_eq!(insert_position(-1, 3), 2);
        assert_eq!(insert_position(-10, 3), 0);
        assert_eq!(insert_position(10, 3), 3);
    }

    fn f64_item(values: &[f64]) -> CpuTensor {
        CpuTensor::new(
            DType::F64,
            &[values.len()],
            TensorData::F64(values.to_vec().into()),
        )
    }

    #[test]
    fn element_equality_is_numeric() {
        let items = CpuValue::List(vec![f64_item(&[0.0, 1.0]), f64_item(&[f64::NAN, 1.0])]);
        let count = |needle: &[f64]| {
            let inputs = [items.clone(), CpuValue::Tensor(f64_item(needle))];
            let out = execute(&Operation::ListCount, &inputs).unwrap();
            out.as_tensor().unwrap().to_index().unwrap()
        };
        assert_eq!(count(&[-0.0, 1.0]), 1);
        assert_eq!(count(&[f64::NAN, 1.0]), 0);
    }
}
