//! The core catalog present on every connection.
//!
//! | id | name        | flags                        |
//! |----|-------------|------------------------------|
//! | 0  | BindMethod  | DONT_SUSPEND, ALLOW_REMOTE   |
//! | 1  | RunCommand  | DONT_SUSPEND                 |
//! | 2  | CoreSuspend | DONT_SUSPEND                 |
//! | 3  | CoreResume  | DONT_SUSPEND                 |
//!
//! Ids 0 and 1 are fixed by the wire protocol; clients never bind them.

use crate::error::{CommandResult, Result};
use crate::handler::{flags, CallContext, HandlerResult, RpcService};
use crate::protocol::{
    CoreBindReply, CoreBindRequest, CoreRunCommandRequest, EmptyMessage, IntMessage,
};

pub const BIND_METHOD: &str = "BindMethod";
pub const RUN_COMMAND: &str = "RunCommand";
pub const CORE_SUSPEND: &str = "CoreSuspend";
pub const CORE_RESUME: &str = "CoreResume";

/// Build the core catalog, in id order.
pub(crate) fn core_service() -> Result<RpcService> {
    let mut service = RpcService::new();
    service
        .add_function(
            BIND_METHOD,
            flags::DONT_SUSPEND | flags::ALLOW_REMOTE,
            bind_method,
        )?
        .add_function(RUN_COMMAND, flags::DONT_SUSPEND, run_command)?
        .add_function(CORE_SUSPEND, flags::DONT_SUSPEND, core_suspend)?
        .add_function(CORE_RESUME, flags::DONT_SUSPEND, core_resume)?;
    Ok(service)
}

fn bind_method(ctx: &mut CallContext<'_>, request: CoreBindRequest) -> HandlerResult<CoreBindReply> {
    let plugin = request.plugin.as_deref().unwrap_or("");

    let Some(function) = ctx.find_function(plugin, &request.method) else {
        ctx.printerr(&format!(
            "RPC method not found: {}::{}\n",
            plugin, request.method
        ));
        return Err(CommandResult::Failure);
    };

    if function.input_type() != request.input_msg || function.output_type() != request.output_msg
    {
        ctx.printerr(&format!(
            "Requested wrong signature for RPC method: {}::{}\n",
            plugin, request.method
        ));
        return Err(CommandResult::Failure);
    }

    let id = function.id().ok_or(CommandResult::Failure)?;
    Ok(CoreBindReply {
        assigned_id: i32::from(id),
    })
}

fn run_command(
    ctx: &mut CallContext<'_>,
    request: CoreRunCommandRequest,
) -> HandlerResult<EmptyMessage> {
    let runner = ctx.command_runner();
    match runner.run_command(ctx, &request.command, &request.arguments) {
        CommandResult::Ok => Ok(EmptyMessage {}),
        status => Err(status),
    }
}

fn core_suspend(ctx: &mut CallContext<'_>, _: EmptyMessage) -> HandlerResult<IntMessage> {
    let depth = ctx.hold_suspend();
    Ok(IntMessage {
        value: depth as i32,
    })
}

fn core_resume(ctx: &mut CallContext<'_>, _: EmptyMessage) -> HandlerResult<IntMessage> {
    let depth = ctx
        .release_suspend()
        .ok_or(CommandResult::WrongUsage)?;
    Ok(IntMessage {
        value: depth as i32,
    })
}
