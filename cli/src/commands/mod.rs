mod goals;
mod helpers;
mod summary;

pub(crate) use goals::cmd_goals;
pub(crate) use summary::{cmd_history, cmd_stats};
