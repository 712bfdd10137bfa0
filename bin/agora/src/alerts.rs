use ag_core::{AlertSink, Notification, UserNotice};
use tracing::{info, warn};

/// Stands in for the toast and sound layer of a real client.
pub struct LogAlerts;

impl AlertSink for LogAlerts {
    fn alert(&self, notification: &Notification) {
        let presentation = notification.kind.presentation();
        info!(
            icon = presentation.icon,
            kind = presentation.label,
            title = %notification.title,
            "🔔 new notification"
        );
    }

    fn notice(&self, notice: UserNotice) {
        warn!(relogin = notice.relogin_required, "{}", notice.message);
    }
}
