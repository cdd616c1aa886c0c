//! Paginated media enumeration: media + live-replay listings merged, split
//! by type, then filtered by time window and fanclub entitlement.

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{debug, info};

use crate::api::routes;
use crate::api::types::{
    BoardPage, ListedMedia, MediaDescriptor, MediaKind, MediaListPage, MyStateData,
    NoticeListPage, PostItem,
};
use crate::http::{HttpClient, HttpResult};

/// Media listing page sizes are randomized per request.
const MEDIA_PAGE_SIZE_RANGE: (u32, u32) = (25_000, 30_000);
/// Board and notice listings are effectively fetch-all.
const BOARD_PAGE_SIZE: u32 = 10_000;

/// Inclusive UTC window over `publishedAt`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        if let Some(start) = self.start {
            if at < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if at > end {
                return false;
            }
        }
        true
    }

    pub fn is_open(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

/// Tri-state fanclub filter from the CLI flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FanclubFilter {
    /// Entitlement decides: members see everything, others only open media.
    #[default]
    Entitled,
    /// `--fanclub`: only fanclub-exclusive media.
    Only,
    /// `--nofanclub`: only open media.
    Exclude,
}

#[derive(Debug, Clone, Default)]
pub struct MediaSelection {
    pub vods: Vec<MediaDescriptor>,
    pub photos: Vec<MediaDescriptor>,
    pub lives: Vec<MediaDescriptor>,
}

impl MediaSelection {
    pub fn total(&self) -> usize {
        self.vods.len() + self.photos.len() + self.lives.len()
    }
}

pub fn kind_of(media_type: Option<&str>) -> Option<MediaKind> {
    match media_type?.to_ascii_uppercase().as_str() {
        "VOD" => Some(MediaKind::Vod),
        "PHOTO" => Some(MediaKind::Photo),
        "LIVE" => Some(MediaKind::Live),
        _ => None,
    }
}

fn descriptor_from(
    media: ListedMedia,
    fallback_kind: MediaKind,
    community_id: i64,
) -> Option<MediaDescriptor> {
    // Media ids are UUIDs on the wire; anything else is a listing artifact.
    if uuid::Uuid::parse_str(&media.media_id).is_err() {
        debug!(id = %media.media_id, "discarding entry with non-uuid media id");
        return None;
    }
    let kind = kind_of(media.media_type.as_deref()).unwrap_or(fallback_kind);
    Some(MediaDescriptor {
        id: media.media_id,
        kind,
        community_id: media.community_id.unwrap_or(community_id),
        is_fanclub_only: media.is_fanclub_only,
        published_at: media.published_at?,
        title: media.title.unwrap_or_default(),
    })
}

/// Splits one partition by entitlement flag and applies the filter policy.
pub fn apply_fanclub_filter(
    items: Vec<MediaDescriptor>,
    filter: FanclubFilter,
    is_member: bool,
) -> Vec<MediaDescriptor> {
    let (fanclub, open): (Vec<_>, Vec<_>) =
        items.into_iter().partition(|item| item.is_fanclub_only);
    match filter {
        FanclubFilter::Only => {
            if is_member {
                fanclub
            } else {
                Vec::new()
            }
        }
        FanclubFilter::Exclude => open,
        FanclubFilter::Entitled => {
            if is_member {
                fanclub.into_iter().chain(open).collect()
            } else {
                open
            }
        }
    }
}

pub fn filter_window(
    items: Vec<MediaDescriptor>,
    window: &TimeWindow,
) -> Vec<MediaDescriptor> {
    if window.is_open() {
        return items;
    }
    items
        .into_iter()
        .filter(|item| window.contains(item.published_at))
        .collect()
}

pub struct MediaEnumerator<'a> {
    http: &'a HttpClient,
}

impl<'a> MediaEnumerator<'a> {
    pub fn new(http: &'a HttpClient) -> Self {
        Self { http }
    }

    /// Full listing for a community: both endpoints paginated to the end,
    /// partitioned by type, then filtered.
    pub async fn enumerate(
        &self,
        community_id: i64,
        window: TimeWindow,
        filter: FanclubFilter,
    ) -> HttpResult<MediaSelection> {
        let (media_pages, live_pages) = tokio::try_join!(
            self.paginate_media(routes::media_list(community_id)),
            self.paginate_media(routes::live_replay_list(community_id)),
        )?;

        let is_member = self.is_fanclub_member(community_id).await;
        debug!(community_id, is_member, "fanclub entitlement probed");

        let mut selection = MediaSelection::default();
        for media in media_pages {
            let fallback = MediaKind::Vod;
            if let Some(descriptor) = descriptor_from(media, fallback, community_id) {
                match descriptor.kind {
                    MediaKind::Photo => selection.photos.push(descriptor),
                    MediaKind::Live => selection.lives.push(descriptor),
                    _ => selection.vods.push(descriptor),
                }
            }
        }
        for media in live_pages {
            if let Some(descriptor) = descriptor_from(media, MediaKind::Live, community_id) {
                selection.lives.push(descriptor);
            }
        }

        selection.vods = filter_window(selection.vods, &window);
        selection.photos = filter_window(selection.photos, &window);
        selection.lives = filter_window(selection.lives, &window);

        selection.vods = apply_fanclub_filter(selection.vods, filter, is_member);
        selection.photos = apply_fanclub_filter(selection.photos, filter, is_member);
        selection.lives = apply_fanclub_filter(selection.lives, filter, is_member);

        info!(
            vods = selection.vods.len(),
            photos = selection.photos.len(),
            lives = selection.lives.len(),
            "enumeration complete"
        );
        Ok(selection)
    }

    async fn paginate_media(&self, url: String) -> HttpResult<Vec<ListedMedia>> {
        let mut collected = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page_size =
                rand::thread_rng().gen_range(MEDIA_PAGE_SIZE_RANGE.0..=MEDIA_PAGE_SIZE_RANGE.1);
            let mut params = vec![
                ("languageCode", "en".to_string()),
                ("pageSize", page_size.to_string()),
            ];
            if let Some(next) = &cursor {
                params.push(("next", next.clone()));
            }
            let page: MediaListPage = self.http.get(&url, &params).await?;
            collected.extend(page.contents.into_iter().map(|entry| entry.media));
            if !page.has_next {
                break;
            }
            cursor = page.cursor.next;
            if cursor.is_none() {
                break;
            }
        }
        Ok(collected)
    }

    async fn is_fanclub_member(&self, community_id: i64) -> bool {
        match self
            .http
            .get::<MyStateData>(
                &routes::my_state(community_id),
                &[("languageCode", "en".to_string())],
            )
            .await
        {
            Ok(state) => state.is_fanclub_member(),
            Err(err) => {
                debug!(error = %err, "fanclub probe failed, assuming non-member");
                false
            }
        }
    }

    /// Board pagination shares the cursor shape with notices.
    pub async fn list_posts(&self, community_id: i64, board_id: i64) -> HttpResult<Vec<PostItem>> {
        let url = routes::board_list(community_id, board_id);
        let mut collected = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut params = vec![
                ("languageCode", "en".to_string()),
                ("pageSize", BOARD_PAGE_SIZE.to_string()),
            ];
            if let Some(next) = &cursor {
                params.push(("next", next.clone()));
            }
            let page: BoardPage = self.http.get(&url, &params).await?;
            collected.extend(page.contents);
            if !page.has_next {
                break;
            }
            cursor = page.cursor.next;
            if cursor.is_none() {
                break;
            }
        }
        Ok(collected)
    }

    pub async fn list_notices(
        &self,
        community_id: i64,
    ) -> HttpResult<Vec<crate::api::types::NoticeItem>> {
        let url = routes::notice_list(community_id);
        let mut collected = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut params = vec![
                ("languageCode", "en".to_string()),
                ("pageSize", BOARD_PAGE_SIZE.to_string()),
            ];
            if let Some(next) = &cursor {
                params.push(("next", next.clone()));
            }
            let page: NoticeListPage = self.http.get(&url, &params).await?;
            collected.extend(page.contents);
            if !page.has_next {
                break;
            }
            cursor = page.cursor.next;
            if cursor.is_none() {
                break;
            }
        }
        Ok(collected)
    }
}
