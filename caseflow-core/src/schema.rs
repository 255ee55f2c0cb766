use diesel::{allow_tables_to_appear_in_same_query, table};

table! {
    users (id) {
        id -> BigInt,
        email -> Text,
        phone -> Nullable<Text>,
        full_name -> Text,
        device_token -> Nullable<Text>,
        whatsapp_phone -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

table! {
    applications (id) {
        id -> BigInt,
        number -> Text,
        applicant_id -> BigInt,
        assigned_to -> Nullable<BigInt>,
        status -> Text,
        subject -> Text,
        description -> Text,
        deadline -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    application_history (id) {
        id -> BigInt,
        application_id -> BigInt,
        user_id -> Nullable<BigInt>,
        action -> Text,
        old_status -> Nullable<Text>,
        new_status -> Nullable<Text>,
        comment -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

table! {
    documents (id) {
        id -> BigInt,
        application_id -> BigInt,
        owner_id -> BigInt,
        name -> Text,
        signed_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
    }
}

table! {
    notifications (id) {
        id -> BigInt,
        recipient_id -> BigInt,
        template_code -> Nullable<Text>,
        notification_type -> Text,
        channel -> Text,
        title -> Nullable<Text>,
        message -> Text,
        data -> Jsonb,
        status -> Text,
        attempts -> Integer,
        max_attempts -> Integer,
        scheduled_at -> Nullable<Timestamptz>,
        sent_at -> Nullable<Timestamptz>,
        delivered_at -> Nullable<Timestamptz>,
        read_at -> Nullable<Timestamptz>,
        error_message -> Nullable<Text>,
        related_application_id -> Nullable<BigInt>,
        related_document_id -> Nullable<BigInt>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    outbox_entries (id) {
        id -> BigInt,
        notification_id -> BigInt,
        channel -> Text,
        recipient_contact -> Text,
        subject -> Nullable<Text>,
        body -> Text,
        html_body -> Nullable<Text>,
        provider_message_id -> Nullable<Text>,
        status -> Text,
        error_message -> Nullable<Text>,
        created_at -> Timestamptz,
        sent_at -> Nullable<Timestamptz>,
    }
}

table! {
    notification_templates (id) {
        id -> BigInt,
        code -> Text,
        name -> Text,
        description -> Text,
        email_subject -> Nullable<Text>,
        email_body -> Nullable<Text>,
        email_html -> Nullable<Text>,
        sms_body -> Nullable<Text>,
        push_title -> Nullable<Text>,
        push_body -> Nullable<Text>,
        channels -> Jsonb,
        is_active -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    user_notification_settings (user_id) {
        user_id -> BigInt,
        email_enabled -> Bool,
        sms_enabled -> Bool,
        push_enabled -> Bool,
        whatsapp_enabled -> Bool,
        telegram_enabled -> Bool,
        application_notifications -> Bool,
        document_notifications -> Bool,
        deadline_notifications -> Bool,
        system_notifications -> Bool,
        news_notifications -> Bool,
        work_hours_only -> Bool,
        work_start -> Time,
        work_end -> Time,
        quiet_hours_start -> Nullable<Time>,
        quiet_hours_end -> Nullable<Time>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

allow_tables_to_appear_in_same_query!(
    users,
    applications,
    application_history,
    documents,
    notifications,
    outbox_entries,
    notification_templates,
    user_notification_settings,
);
