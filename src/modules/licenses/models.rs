use licenses_kernel::{ColumnDeclaration as Column, ColumnType, TableDeclaration, TableScope};

/// Master record of every issued license.
pub fn licenses() -> TableDeclaration {
    TableDeclaration::new("licenses", TableScope::Shared)
        .column(Column::serial_id("id"))
        .column(
            Column::new("license_key", ColumnType::Varchar(64))
                .not_null()
                .unique(),
        )
        .column(Column::new("client_name", ColumnType::Varchar(200)).not_null())
        .column(Column::new("client_company", ColumnType::Varchar(200)))
        .column(Column::new("client_email", ColumnType::Varchar(200)))
        .column(Column::new("client_phone", ColumnType::Varchar(50)))
        .column(Column::new("license_type", ColumnType::Varchar(50)))
        .column(Column::new("admin_username", ColumnType::Varchar(80)))
        .column(Column::new("admin_password_hash", ColumnType::Varchar(255)))
        .column(
            Column::new("is_active", ColumnType::Boolean)
                .not_null()
                .default_value("TRUE"),
        )
        .column(
            Column::new("is_suspended", ColumnType::Boolean)
                .not_null()
                .default_value("FALSE"),
        )
        .column(Column::new("suspension_reason", ColumnType::Text))
        .column(
            Column::new("max_users", ColumnType::Integer)
                .not_null()
                .default_value("5"),
        )
        .column(Column::new("expires_at", ColumnType::Timestamp))
        .column(
            Column::new("created_at", ColumnType::Timestamp)
                .not_null()
                .default_value("CURRENT_TIMESTAMP"),
        )
}

/// Activation, suspension and extension history per license.
pub fn license_events() -> TableDeclaration {
    TableDeclaration::new("license_events", TableScope::Shared)
        .column(Column::new("id", ColumnType::BigSerial).primary_key())
        .column(
            Column::new("license_id", ColumnType::Integer)
                .not_null()
                .references("licenses", "id"),
        )
        .column(Column::new("event_type", ColumnType::Varchar(32)).not_null())
        .column(Column::new("detail", ColumnType::Text))
        .column(
            Column::new("created_at", ColumnType::Timestamp)
                .not_null()
                .default_value("CURRENT_TIMESTAMP"),
        )
}
