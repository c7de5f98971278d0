//! The `riptide` CLI: runs WebAssembly modules from the command line.

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use riptide::{Config, Engine, Func, Linker, Module, Store, Strategy, Val, ValType};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "riptide", version, about = "A WebAssembly runtime")]
struct RunCommand {
    /// The module to run, in binary or text format.
    module: PathBuf,

    /// Name of an exported function to invoke, with `args` as its
    /// parameters. Without this the module is only instantiated (which
    /// runs its start function).
    #[arg(long, value_name = "FUNCTION")]
    invoke: Option<String>,

    /// Arguments for the invoked function, one per parameter.
    #[arg(value_name = "ARGS")]
    args: Vec<String>,

    /// Run everything in the interpreter, even where a compiler backend
    /// is available.
    #[arg(long)]
    interpreter: bool,

    /// Maximum stack size, in bytes, available to guest code.
    #[arg(long, value_name = "BYTES")]
    max_wasm_stack: Option<usize>,
}

fn main() -> Result<()> {
    env_logger::init();
    RunCommand::parse().execute()
}

impl RunCommand {
    fn execute(&self) -> Result<()> {
        let mut config = Config::new();
        if self.interpreter {
            config.strategy(Strategy::Interpreter);
        }
        if let Some(max) = self.max_wasm_stack {
            config.max_wasm_stack(max);
        }
        let engine = Engine::new(&config)?;
        let module = Module::from_file(&engine, &self.module)
            .with_context(|| format!("failed to load `{}`", self.module.display()))?;

        let mut store = Store::new(&engine, ());
        let linker = Linker::new();
        let instance = linker
            .instantiate(&mut store, &module)
            .with_context(|| format!("failed to instantiate `{}`", self.module.display()))?;

        match &self.invoke {
            Some(name) => {
                let func = instance
                    .get_func(&mut store, name)
                    .ok_or_else(|| anyhow!("no exported function named `{name}`"))?;
                self.invoke_func(&mut store, func, name)
            }
            None => Ok(()),
        }
    }

    fn invoke_func(&self, store: &mut Store<()>, func: Func, name: &str) -> Result<()> {
        let ty = func.ty(store);
        if self.args.len() != ty.params().len() {
            bail!(
                "`{name}` takes {} parameters, got {} arguments",
                ty.params().len(),
                self.args.len()
            );
        }
        let params = self
            .args
            .iter()
            .zip(ty.params())
            .map(|(arg, ty)| parse_arg(arg, *ty))
            .collect::<Result<Vec<_>>>()?;

        let mut results = vec![Val::I32(0); ty.results().len()];
        func.call(store, &params, &mut results)
            .with_context(|| format!("failed to invoke `{name}`"))?;

        for value in &results {
            println!("{}", format_val(value));
        }
        Ok(())
    }
}

fn parse_arg(arg: &str, ty: ValType) -> Result<Val> {
    let value = match ty {
        ValType::I32 => Val::I32(
            arg.parse()
                .with_context(|| format!("`{arg}` is not a valid i32"))?,
        ),
        ValType::I64 => Val::I64(
            arg.parse()
                .with_context(|| format!("`{arg}` is not a valid i64"))?,
        ),
        ValType::F32 => {
            let f: f32 = arg
                .parse()
                .with_context(|| format!("`{arg}` is not a valid f32"))?;
            Val::F32(f.to_bits())
        }
        ValType::F64 => {
            let f: f64 = arg
                .parse()
                .with_context(|| format!("`{arg}` is not a valid f64"))?;
            Val::F64(f.to_bits())
        }
        _ => bail!("cannot pass a {ty} parameter from the command line"),
    };
    Ok(value)
}

fn format_val(value: &Val) -> String {
    match value {
        Val::I32(v) => v.to_string(),
        Val::I64(v) => v.to_string(),
        Val::F32(bits) => f32::from_bits(*bits).to_string(),
        Val::F64(bits) => f64::from_bits(*bits).to_string(),
        Val::V128(v) => format!("{v:#034x}"),
        Val::FuncRef(Some(_)) => "funcref".to_string(),
        Val::FuncRef(None) => "null funcref".to_string(),
        Val::ExternRef(Some(_)) => "externref".to_string(),
        Val::ExternRef(None) => "null externref".to_string(),
    }
}
