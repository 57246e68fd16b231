use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::{api, state::AppState, ws};

/// Full HTTP surface: WebSocket attach points, room/user CRUD, static files
pub fn build_router(state: AppState) -> Router {
    let ws_routes = Router::new()
        .route("/ws/room", get(ws::room_query_ws_handler))
        .route("/ws/room/{room_id}", get(ws::room_ws_handler))
        .route("/ws/{channel}", get(ws::channel_ws_handler));

    let room_routes = Router::new()
        .route("/room", get(api::list_rooms).post(api::create_room))
        .route(
            "/room/{room_id}",
            get(api::get_room)
                .put(api::update_room)
                .delete(api::delete_room),
        )
        .route("/room/{room_id}/members", axum::routing::post(api::join_room))
        .route("/room/{room_id}/members/{member_id}", get(api::get_member));

    let user_routes = Router::new()
        .route("/user", get(api::list_users).post(api::create_user))
        .route(
            "/user/{user_id}",
            get(api::get_user)
                .put(api::update_user)
                .delete(api::delete_user),
        );

    Router::new()
        .merge(ws_routes)
        .merge(room_routes)
        .merge(user_routes)
        .fallback_service(ServeDir::new(&state.config.static_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
