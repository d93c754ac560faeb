//! Generic instruction-by-instruction evaluation over any [`PortableBackend`].

use std::collections::HashMap;

use crate::backend::{
    error::NumericValidationError,
    spec::{
        AliasKind, BackendError, BackendResult, Function, HostValue, Instruction, Operand,
        Operation, PortableBackend, TensorLiteral, ValueId,
    },
    topology,
};

/// Number of offending positions reported by a numeric validation error.
const MAX_REPORTED_POSITIONS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionOptions {
    /// Validate every produced value for NaN/Inf.
    pub check_finite: bool,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            check_finite: crate::env::check_finite_default(),
        }
    }
}

/// Evaluates `function` in topological order.
///
/// Every input must conform to its declared parameter type, including static extents.
///
/// Values are kept in an environment keyed by id. A node that consumes an operand removes that
/// operand from the environment, so any later read fails with an execution error.
pub fn execute_function<B: PortableBackend>(
    backend: &B,
    function: &Function,
    inputs: &[B::TensorHandle],
    options: &ExecutionOptions,
) -> BackendResult<Vec<B::TensorHandle>> {
    if function.parameter_ids.len() != inputs.len() {
        return Err(BackendError::execution(format!(
            "@{} expects {} inputs, got {}",
            function.name,
            function.parameter_ids.len(),
            inputs.len()
        )));
    }

    let order = topology::toposort(function)
        .map_err(|err| BackendError::execution(format!("@{}: {err}", function.name)))?;

    let mut values: HashMap<ValueId, B::TensorHandle> = HashMap::new();
    let params = function.parameter_ids.iter().zip(&function.parameters);
    for (index, ((param, ty), handle)) in params.zip(inputs).enumerate() {
        let host = backend.to_host(handle)?;
        if !host.conforms_to(ty) {
            return Err(BackendError::execution(format!(
                "@{} input {index} ({param}) does not match its declared type {ty:?}",
                function.name
            )));
        }
        if options.check_finite {
            finite_or_error(&host, "input", *param)?;
        }
        values.insert(*param, handle.clone());
    }

    for pos in order {
        let instruction = &function.body[pos];
        let operands = gather_operands(backend, instruction, &values)?;
        if let AliasKind::Consumes(index) = instruction.op.alias() {
            if let Some(consumed) = instruction.operands.get(index).and_then(Operand::as_value) {
                values.remove(&consumed);
            }
        }

        let op_checks = op_checks_finite(&instruction.op);
        if op_checks {
            for (operand, handle) in instruction.operands.iter().zip(&operands) {
                let value = operand.as_value().unwrap_or(instruction.id);
                check_finite(backend, instruction.op.name(), value, handle)?;
            }
        }

        log::trace!(
            target: "tgraph::executor",
            "{} = {} on {}",
            instruction.id,
            instruction.op.name(),
            backend.backend_name()
        );
        let output = backend
            .execute_instruction(instruction, &operands)
            .map_err(|err| annotate(err, function, pos, instruction))?;
        if options.check_finite || op_checks {
            check_finite(backend, instruction.op.name(), instruction.id, &output)?;
        }
        values.insert(instruction.id, output);
    }

    function
        .result_ids
        .iter()
        .map(|id| {
            values.get(id).cloned().ok_or_else(|| {
                BackendError::execution(format!("result {id} of @{} is unavailable", function.name))
            })
        })
        .collect()
}

fn gather_operands<B: PortableBackend>(
    backend: &B,
    instruction: &Instruction,
    values: &HashMap<ValueId, B::TensorHandle>,
) -> BackendResult<Vec<B::TensorHandle>> {
    instruction
        .operands
        .iter()
        .map(|operand| match operand {
            Operand::Value(id) => values.get(id).cloned().ok_or_else(|| {
                BackendError::execution(format!(
                    "{} reads {id}, which was consumed or never defined",
                    instruction.id
                ))
            }),
            Operand::Literal(literal) => backend.materialize(HostValue::Tensor(literal.clone())),
        })
        .collect()
}

fn op_checks_finite(op: &Operation) -> bool {
    matches!(op, Operation::SolveTriangular(spec) if spec.check_finite)
}

fn check_finite<B: PortableBackend>(
    backend: &B,
    op: &'static str,
    value: ValueId,
    handle: &B::TensorHandle,
) -> BackendResult<()> {
    finite_or_error(&backend.to_host(handle)?, op, value)
}

fn finite_or_error(host: &HostValue, op: &'static str, value: ValueId) -> BackendResult<()> {
    let mut positions = Vec::new();
    let mut offset = 0usize;
    collect_non_finite(host, &mut offset, &mut positions);
    if positions.is_empty() {
        Ok(())
    } else {
        Err(NumericValidationError {
            op,
            value,
            positions,
        }
        .into())
    }
}

fn collect_non_finite(host: &HostValue, offset: &mut usize, positions: &mut Vec<usize>) {
    match host {
        HostValue::Tensor(literal) => scan_literal(literal, offset, positions),
        HostValue::List(items) => {
            for literal in items {
                scan_literal(literal, offset, positions);
            }
        }
        HostValue::Tuple(items) => {
            for item in items {
                collect_non_finite(item, offset, positions);
            }
        }
    }
}

fn scan_literal(literal: &TensorLiteral, offset: &mut usize, positions: &mut Vec<usize>) {
    if !literal.spec.dtype.is_float() {
        *offset += literal.spec.element_count().unwrap_or(0);
        return;
    }
    let values = literal.to_f64_vec();
    for (idx, value) in values.iter().enumerate() {
        if !value.is_finite() && positions.len() < MAX_REPORTED_POSITIONS {
            positions.push(*offset + idx);
        }
    }
    *offset += values.len();
}

fn annotate(
    err: BackendError,
    function: &Function,
    pos: usize,
    instruction: &Instruction,
) -> BackendError {
    match err {
        BackendError::Execution { message } => BackendError::execution(format!(
            "@{} body[{pos}] {} = {}: {message}",
            function.name,
            instruction.id,
            instruction.op.name()
        )),
        other => other,
    }
}
