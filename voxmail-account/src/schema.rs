// Mirrors migrations/2026-01-01-000000_create_accounts.

diesel::table! {
    users (id) {
        id -> Uuid,
        #[max_length = 255]
        email -> Varchar,
        #[max_length = 255]
        name -> Nullable<Varchar>,
        #[max_length = 255]
        password_hash -> Nullable<Varchar>,
        credits -> Int4,
        #[max_length = 6]
        otp_code -> Nullable<Varchar>,
        otp_expires_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    oauth_connections (id) {
        id -> Uuid,
        user_id -> Uuid,
        access_token -> Text,
        refresh_token -> Text,
        expires_at -> Timestamptz,
        scopes -> Array<Text>,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    messages (id) {
        id -> Uuid,
        seq -> Int8,
        user_id -> Uuid,
        #[max_length = 20]
        role -> Varchar,
        content -> Text,
        analysis -> Nullable<Jsonb>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    email_history (id) {
        id -> Uuid,
        user_id -> Uuid,
        #[max_length = 255]
        receiver_email -> Varchar,
        #[max_length = 255]
        receiver_name -> Varchar,
        #[max_length = 50]
        email_type -> Varchar,
        #[max_length = 20]
        status -> Varchar,
        sent_at -> Timestamptz,
    }
}

diesel::joinable!(oauth_connections -> users (user_id));
diesel::joinable!(messages -> users (user_id));
diesel::joinable!(email_history -> users (user_id));

diesel::allow_tables_to_appear_in_same_query!(
    users,
    oauth_connections,
    messages,
    email_history,
);
