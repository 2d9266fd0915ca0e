//! Table registry
//!
//! Single source of truth for the hosted backend table names and the row
//! type stored in each of them.

use serde::de::DeserializeOwned;
use std::fmt;

use super::models::{
    Conversion, DmCampaign, EmailSignup, OutboundClick, Pageview, RedgifsAsset, ScheduledPost,
};

/// Tables owned by the hosted backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    Pageviews,
    OutboundClicks,
    EmailSignups,
    Conversions,
    DmCampaigns,
    ScheduledPosts,
    Redgifs,
}

impl Table {
    /// Table name on the hosted backend
    pub fn name(self) -> &'static str {
        match self {
            Table::Pageviews => "eva_pageviews",
            Table::OutboundClicks => "eva_of_clicks",
            Table::EmailSignups => "eva_email_signups",
            Table::Conversions => "eva_conversions",
            Table::DmCampaigns => "eva_dm_campaigns",
            Table::ScheduledPosts => "eva_scheduled_posts",
            Table::Redgifs => "eva_redgifs",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A row type bound to the table it lives in
pub trait Record: DeserializeOwned + Send {
    const TABLE: Table;
}

impl Record for Pageview {
    const TABLE: Table = Table::Pageviews;
}

impl Record for OutboundClick {
    const TABLE: Table = Table::OutboundClicks;
}

impl Record for EmailSignup {
    const TABLE: Table = Table::EmailSignups;
}

impl Record for Conversion {
    const TABLE: Table = Table::Conversions;
}

impl Record for DmCampaign {
    const TABLE: Table = Table::DmCampaigns;
}

impl Record for ScheduledPost {
    const TABLE: Table = Table::ScheduledPosts;
}

impl Record for RedgifsAsset {
    const TABLE: Table = Table::Redgifs;
}
