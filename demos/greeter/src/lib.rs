//! Demo mod: shouts the name passed to `host::greet` and counts seconds.
//!
//! Copy this directory into the host's mods directory and fix the
//! `modhost-sdk` path in `Cargo.toml` accordingly.

use std::sync::atomic::{AtomicU64, Ordering};

use modhost_sdk::prelude::*;

static UPTIME: AtomicU64 = AtomicU64::new(0);

#[derive(Default)]
struct Greeter {
    patch: Option<PatchId>,
}

impl Mod for Greeter {
    fn init(&mut self, ctx: &mut dyn ModContext) -> Result<(), ModError> {
        self.patch = Some(ctx.patch(PatchRequest::on("host::greet").pre(shout).post(sign))?);

        ctx.create_timer(
            "uptime",
            Duration::from_secs(1),
            Some(json!({ "step": 1 })),
            Arc::new(|state: Option<&Value>| {
                let step = state.and_then(|s| s["step"].as_u64()).unwrap_or(1);
                UPTIME.fetch_add(step, Ordering::Relaxed);
            }),
        )?;
        Ok(())
    }

    fn stop(&mut self, ctx: &mut dyn ModContext) -> Result<(), ModError> {
        if let Some(id) = self.patch.take() {
            ctx.unpatch(id);
        }
        Ok(())
    }
}

fn shout(frame: &mut CallFrame) -> HookFlow {
    if let Some(Value::String(name)) = frame.args.first_mut() {
        *name = name.to_uppercase();
    }
    HookFlow::Continue
}

fn sign(frame: &mut CallFrame) {
    if let Value::String(text) = &mut frame.result {
        text.push_str(&format!(" (up {}s)", UPTIME.load(Ordering::Relaxed)));
    }
}

export_mods! {
    "Greeter" => Greeter,
}
