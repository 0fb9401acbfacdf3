use server_api::ApiContext;

use crate::config::Settings;

#[derive(Debug, Clone)]
pub(crate) struct CookieSettings {
    pub(crate) name: String,
    pub(crate) secure: bool,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) api: ApiContext,
    pub(crate) cookie: CookieSettings,
    pub(crate) outbound_buffer: usize,
}

impl AppState {
    pub(crate) fn new(api: ApiContext, settings: &Settings) -> Self {
        Self {
            api,
            cookie: CookieSettings {
                name: settings.session_cookie.clone(),
                secure: settings.cookie_secure,
            },
            outbound_buffer: settings.outbound_buffer.max(1),
        }
    }
}
