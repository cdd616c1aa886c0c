//! URL builders for every platform endpoint the pipeline touches.

pub const SVC_HOST: &str = "https://svc-api.berriz.in";
pub const ACCOUNT_HOST: &str = "https://account.berriz.in";
pub const BASE_HOST: &str = "https://berriz.in";
pub const DRM_HOST: &str = "https://berriz.drmkeyserver.com";

/// OAuth client id the web player registers with the account service.
pub const CLIENT_ID: &str = "e8faf56c-575a-42d2-933d-7b2e279ad827";

pub fn token_refresh() -> String {
    format!("{ACCOUNT_HOST}/auth/v1/token:refresh?languageCode=en")
}

pub fn authorize_init() -> String {
    format!("{ACCOUNT_HOST}/auth/v1/authorize:init")
}

pub fn authenticate() -> String {
    format!("{ACCOUNT_HOST}/auth/v1/authenticate")
}

pub fn authorize() -> String {
    format!("{ACCOUNT_HOST}/auth/v1/authorize")
}

pub fn token_issue() -> String {
    format!("{ACCOUNT_HOST}/auth/v1/token:issue")
}

/// Prefix of the redirect target carrying the authorization code.
pub fn auth_code_prefix() -> String {
    format!("{BASE_HOST}/auth/token?code=")
}

pub fn playback_info(media_id: &str) -> String {
    format!("{SVC_HOST}/service/v1/medias/{media_id}/playback_info")
}

pub fn live_playback_context(media_id: &str) -> String {
    format!("{SVC_HOST}/service/v1/medias/live/replay/{media_id}/playback_area_context")
}

pub fn public_context(media_id: &str) -> String {
    format!("{SVC_HOST}/service/v1/medias/{media_id}/public_context")
}

pub fn media_list(community_id: i64) -> String {
    format!("{SVC_HOST}/service/v1/community/{community_id}/medias")
}

pub fn live_replay_list(community_id: i64) -> String {
    format!("{SVC_HOST}/service/v1/community/{community_id}/medias/live/end")
}

pub fn community_list() -> String {
    format!("{SVC_HOST}/service/v1/communities")
}

pub fn community_join(community_id: i64) -> String {
    format!("{SVC_HOST}/service/v1/community/{community_id}/join")
}

pub fn community_leave(community_id: i64) -> String {
    format!("{SVC_HOST}/service/v1/community/{community_id}/leave")
}

pub fn my_state(community_id: i64) -> String {
    format!("{SVC_HOST}/service/v1/community/{community_id}/my")
}

pub fn board_list(community_id: i64, board_id: i64) -> String {
    format!("{SVC_HOST}/service/v1/community/{community_id}/boards/{board_id}/posts")
}

pub fn post_detail(post_id: &str) -> String {
    format!("{SVC_HOST}/service/v1/posts/{post_id}")
}

pub fn notice_list(community_id: i64) -> String {
    format!("{SVC_HOST}/service/v1/community/{community_id}/notices")
}

pub fn notice_detail(community_id: i64, notice_id: i64) -> String {
    format!("{SVC_HOST}/service/v1/community/{community_id}/notices/{notice_id}")
}

pub fn translate_post(post_id: &str) -> String {
    format!("{SVC_HOST}/service/v1/translate/post/{post_id}")
}

pub fn widevine_license() -> String {
    format!("{DRM_HOST}/widevine_license")
}

pub fn playready_license() -> String {
    format!("{DRM_HOST}/playready_license")
}
