//! Esquema Diesel, escrito a mano. Reemplazable con `diesel print-schema`.

diesel::table! {
    flow_checkpoints (flow_id) {
        flow_id -> Uuid,
        logic_type -> Text,
        status -> Text,
        record -> Jsonb,
        checksum -> Text,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    notary_commit_log (tx_hash, output_index) {
        tx_hash -> Text,
        output_index -> Integer,
        consuming_tx_id -> Text,
        input_index -> Integer,
        requesting_party -> Text,
        committed_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(flow_checkpoints, notary_commit_log,);
