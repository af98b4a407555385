//! List commands implementation

use anyhow::Result;
use remote_table_backup::Context;

use super::common::print_listing;

/// Execute the list command
pub async fn execute(ctx: &Context) -> Result<()> {
    print_listing(&ctx.backups, "backups")
}

/// Execute the list-safety command
pub async fn execute_safety(ctx: &Context) -> Result<()> {
    print_listing(&ctx.safety, "safety backups")
}
