//! Participant-count check after joining a room.

use crate::deadline::Context;
use crate::driver::ConferenceDriver;
use crate::error::{Result, ScenarioError};
use crate::poll::retry_with_interval;
use cuj_core::{ParticipantRule, RoomSize};
use std::time::Duration;
use tracing::{debug, info};

/// Number of observations before a bad count is fatal.
pub const PARTICIPANT_ATTEMPTS: u32 = 5;

/// Pause between observations.
pub const PARTICIPANT_INTERVAL: Duration = Duration::from_secs(1);

/// Observe the room until its participant count is acceptable for `room`.
///
/// Returns the accepted count. Rooms without a conference always pass.
pub async fn wait_for_participants<D>(ctx: &Context, driver: &D, room: RoomSize) -> Result<u32>
where
    D: ConferenceDriver + ?Sized,
{
    let Some(rule) = ParticipantRule::for_room(room, driver.expected_participants(room)) else {
        return Ok(0);
    };

    let count = retry_with_interval(ctx, PARTICIPANT_ATTEMPTS, PARTICIPANT_INTERVAL, |ctx| async move {
        let got = driver.participant_count(&ctx).await?;
        debug!(got, want = %rule, "observed participants");
        if rule.accepts(got) {
            Ok(got)
        } else {
            Err(ScenarioError::ParticipantCount {
                got,
                want: rule.to_string(),
            })
        }
    })
    .await?;

    info!(room = room.as_str(), participants = count, "participant count accepted");
    Ok(count)
}
