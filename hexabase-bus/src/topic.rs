use std::fmt;

/// The fixed set of topics the control plane's components communicate
/// over (spec §6). A closed enum rather than a free-form string so a
/// typo in a topic name is a compile error, not a silently-undelivered
/// message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    VClusterProvisioning,
    VClusterHnc,
    VClusterLifecycle,
    StripeWebhook,
    UserNotification,
    SystemMaintenance,
    FunctionLifecycle,
    ProjectActivity,
}

impl Topic {
    pub fn stream_key(&self) -> &'static str {
        match self {
            Topic::VClusterProvisioning => "vcluster.provisioning",
            Topic::VClusterHnc => "vcluster.hnc",
            Topic::VClusterLifecycle => "vcluster.lifecycle",
            Topic::StripeWebhook => "stripe.webhook",
            Topic::UserNotification => "user.notification",
            Topic::SystemMaintenance => "system.maintenance",
            Topic::FunctionLifecycle => "function.lifecycle",
            Topic::ProjectActivity => "project.activity",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.stream_key())
    }
}
