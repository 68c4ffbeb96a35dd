//! WASM-backed user watch policies
//!
//! A user policy is a WASM module exposing `alloc` and `decide` exports.
//! The scheduler serializes a `PolicyInput` into the module's linear
//! memory, calls `decide(ptr, len)`, and reads a length-prefixed
//! `PolicyVerdict` back. Fuel metering bounds runaway policies.

use super::{StepContext, Verdict, WatchPolicy};
use anyhow::{Context, Result};
use gpuscope_shared::policy::{PolicyDeviceInfo, PolicyInput, POLICY_API_VERSION};
use std::path::Path;
use wasmtime::{Config, Engine, Instance, Module, Store, WasmBacktraceDetails};

const FUEL_PER_DECISION: u64 = 1_000_000;

/// A user policy loaded from a WASM module.
pub struct WasmPolicy {
    module: Module,
    store: Store<()>,
}

impl WasmPolicy {
    /// Compile the module at `path` and verify it exposes the policy entry
    /// points. A module missing `decide` is rejected here so the caller can
    /// fall back to the default policy.
    pub fn new(path: &Path) -> Result<Self> {
        let mut config = Config::new();
        config.wasm_backtrace_details(WasmBacktraceDetails::Enable);
        config.consume_fuel(true);
        let engine = Engine::new(&config)?;

        let module =
            Module::from_file(&engine, path).context("failed to load watch script module")?;
        for required in ["alloc", "decide"] {
            if !module.exports().any(|e| e.name() == required) {
                anyhow::bail!("watch script does not export `{}`", required);
            }
        }

        let mut store = Store::new(&engine, ());
        store.set_fuel(FUEL_PER_DECISION)?;

        // A module may pin the ABI revision it was built against; absent the
        // export, it is assumed current.
        let instance = Instance::new(&mut store, &module, &[])
            .context("failed to instantiate watch script")?;
        if let Ok(api_version) = instance.get_typed_func::<(), u32>(&mut store, "api_version") {
            let got = api_version.call(&mut store, ())?;
            anyhow::ensure!(
                got == POLICY_API_VERSION,
                "watch script targets policy api v{}, host speaks v{}",
                got,
                POLICY_API_VERSION
            );
        }
        store.set_fuel(FUEL_PER_DECISION)?;

        Ok(Self { module, store })
    }

    fn run(&mut self, input: &PolicyInput) -> Result<Verdict> {
        let input_bytes = bincode::serialize(input).context("failed to serialize policy input")?;

        let instance = Instance::new(&mut self.store, &self.module, &[])
            .context("failed to instantiate watch script")?;
        let memory = instance
            .get_memory(&mut self.store, "memory")
            .context("watch script exports no memory")?;

        let alloc = instance.get_typed_func::<u32, u32>(&mut self.store, "alloc")?;
        let input_ptr = alloc.call(&mut self.store, input_bytes.len() as u32)?;
        memory.write(&mut self.store, input_ptr as usize, &input_bytes)?;

        let decide = instance.get_typed_func::<(u32, u32), u32>(&mut self.store, "decide")?;
        let output_ptr = decide.call(&mut self.store, (input_ptr, input_bytes.len() as u32))?;

        // Output is a 4-byte little-endian length followed by the payload
        let mut len_bytes = [0u8; 4];
        memory.read(&self.store, output_ptr as usize, &mut len_bytes)?;
        let output_len = u32::from_le_bytes(len_bytes) as usize;
        let mut output_bytes = vec![0u8; output_len];
        memory.read(&self.store, output_ptr as usize + 4, &mut output_bytes)?;

        let verdict: Verdict = bincode::deserialize(&output_bytes)
            .context("failed to deserialize watch script verdict")?;

        if let Ok(dealloc) =
            instance.get_typed_func::<(u32, u32), ()>(&mut self.store, "dealloc")
        {
            dealloc.call(&mut self.store, (input_ptr, input_bytes.len() as u32))?;
            dealloc.call(&mut self.store, (output_ptr, output_len as u32 + 4))?;
        }

        self.store.set_fuel(FUEL_PER_DECISION)?;
        Ok(verdict)
    }
}

impl WatchPolicy for WasmPolicy {
    fn name(&self) -> &str {
        "wasm"
    }

    fn decide(&mut self, ctx: &StepContext) -> Result<Verdict> {
        let input = PolicyInput {
            event: ctx.event.clone(),
            recent_events: ctx.recent_events.clone(),
            counters: ctx
                .counters
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            device: ctx.device.as_ref().map(|d| PolicyDeviceInfo {
                device_id: d.device_id,
                num_sms: d.num_sms,
                smem_per_sm_bytes: d.smem_per_sm_bytes,
                regs_per_sm: d.regs_per_sm,
                max_blocks_per_sm: d.max_blocks_per_sm,
            }),
        };
        self.run(&input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_module_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"\0asm garbage").unwrap();
        assert!(WasmPolicy::new(file.path()).is_err());
    }

    #[test]
    fn test_module_without_decide_rejected() {
        // A valid but empty module: exports neither alloc nor decide.
        // wasmtime's default `wat` feature accepts text modules from file.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.wat");
        std::fs::write(&path, "(module)").unwrap();
        let Err(err) = WasmPolicy::new(&path) else {
            panic!("module without policy exports must be rejected");
        };
        assert!(err.to_string().contains("alloc"));
    }

    #[test]
    fn test_mismatched_api_version_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.wat");
        std::fs::write(
            &path,
            r#"(module
                (memory (export "memory") 1)
                (func (export "alloc") (param i32) (result i32) i32.const 0)
                (func (export "decide") (param i32 i32) (result i32) i32.const 0)
                (func (export "api_version") (result i32) i32.const 99))"#,
        )
        .unwrap();
        let Err(err) = WasmPolicy::new(&path) else {
            panic!("stale policy api must be rejected");
        };
        assert!(err.to_string().contains("policy api"));
    }
}
