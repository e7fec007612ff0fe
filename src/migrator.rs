use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_orders_table::Migration),
            Box::new(m20240601_000002_create_order_items_table::Migration),
            Box::new(m20240601_000003_create_payments_table::Migration),
            Box::new(m20240601_000004_create_transactions_table::Migration),
            Box::new(m20240601_000005_create_drones_table::Migration),
            Box::new(m20240601_000006_create_deliveries_table::Migration),
            Box::new(m20240601_000007_create_notifications_table::Migration),
        ]
    }
}

// Migration implementations

mod m20240601_000001_create_orders_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_orders_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Create orders table aligned with entities::order Model
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Orders::OrderNumber).string().not_null())
                        .col(ColumnDef::new(Orders::RestaurantId).uuid().not_null())
                        .col(ColumnDef::new(Orders::CustomerId).uuid().null())
                        .col(ColumnDef::new(Orders::GuestName).string().null())
                        .col(ColumnDef::new(Orders::GuestPhone).string().null())
                        .col(ColumnDef::new(Orders::GuestEmail).string().null())
                        .col(ColumnDef::new(Orders::Subtotal).decimal().not_null())
                        .col(ColumnDef::new(Orders::DeliveryFee).decimal().not_null())
                        .col(
                            ColumnDef::new(Orders::Discount)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Orders::Total).decimal().not_null())
                        .col(ColumnDef::new(Orders::PaymentMethod).string().not_null())
                        .col(ColumnDef::new(Orders::PaymentProvider).string().not_null())
                        .col(ColumnDef::new(Orders::PaymentSessionId).string().not_null())
                        .col(
                            ColumnDef::new(Orders::PaymentSessionExpiresAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Orders::PaymentStatus).string().not_null())
                        .col(ColumnDef::new(Orders::TransactionId).string().null())
                        .col(ColumnDef::new(Orders::PaidAt).timestamp().null())
                        .col(ColumnDef::new(Orders::PaidAmount).decimal().null())
                        .col(ColumnDef::new(Orders::Status).string().not_null())
                        .col(ColumnDef::new(Orders::Timeline).json().not_null())
                        .col(ColumnDef::new(Orders::DeliveryAddress).string().not_null())
                        .col(ColumnDef::new(Orders::PickupLat).double().not_null())
                        .col(ColumnDef::new(Orders::PickupLng).double().not_null())
                        .col(ColumnDef::new(Orders::DropoffLat).double().not_null())
                        .col(ColumnDef::new(Orders::DropoffLng).double().not_null())
                        .col(ColumnDef::new(Orders::AssignedDroneId).uuid().null())
                        .col(ColumnDef::new(Orders::DispatchedAt).timestamp().null())
                        .col(
                            ColumnDef::new(Orders::EstimatedDeliveryTime)
                                .timestamp()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Orders::ActualDeliveryTime)
                                .timestamp()
                                .null(),
                        )
                        .col(ColumnDef::new(Orders::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Orders::UpdatedAt).timestamp().null())
                        .to_owned(),
                )
                .await?;

            // Order numbers and payment sessions are both lookup keys and must
            // be unique.
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_order_number")
                        .table(Orders::Table)
                        .col(Orders::OrderNumber)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_payment_session_id")
                        .table(Orders::Table)
                        .col(Orders::PaymentSessionId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_restaurant_id")
                        .table(Orders::Table)
                        .col(Orders::RestaurantId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_customer_id")
                        .table(Orders::Table)
                        .col(Orders::CustomerId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_status")
                        .table(Orders::Table)
                        .col(Orders::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Orders {
        Table,
        Id,
        OrderNumber,
        RestaurantId,
        CustomerId,
        GuestName,
        GuestPhone,
        GuestEmail,
        Subtotal,
        DeliveryFee,
        Discount,
        Total,
        PaymentMethod,
        PaymentProvider,
        PaymentSessionId,
        PaymentSessionExpiresAt,
        PaymentStatus,
        TransactionId,
        PaidAt,
        PaidAmount,
        Status,
        Timeline,
        DeliveryAddress,
        PickupLat,
        PickupLng,
        DropoffLat,
        DropoffLng,
        AssignedDroneId,
        DispatchedAt,
        EstimatedDeliveryTime,
        ActualDeliveryTime,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000002_create_order_items_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_order_items_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(OrderItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderItems::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::ProductId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::Name).string().not_null())
                        .col(ColumnDef::new(OrderItems::UnitPrice).decimal().not_null())
                        .col(ColumnDef::new(OrderItems::Quantity).integer().not_null())
                        .col(ColumnDef::new(OrderItems::TotalPrice).decimal().not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_items_order_id")
                        .table(OrderItems::Table)
                        .col(OrderItems::OrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderItems::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum OrderItems {
        Table,
        Id,
        OrderId,
        ProductId,
        Name,
        UnitPrice,
        Quantity,
        TotalPrice,
    }
}

mod m20240601_000003_create_payments_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000003_create_payments_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Payments::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Payments::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Payments::OrderId).uuid().not_null())
                        .col(ColumnDef::new(Payments::TransactionId).string().not_null())
                        .col(ColumnDef::new(Payments::Provider).string().not_null())
                        .col(ColumnDef::new(Payments::Method).string().not_null())
                        .col(ColumnDef::new(Payments::Amount).decimal().not_null())
                        .col(ColumnDef::new(Payments::RawData).json().not_null())
                        .col(ColumnDef::new(Payments::CreatedAt).timestamp().not_null())
                        .to_owned(),
                )
                .await?;

            // The unique transaction index is what makes reconciliation
            // idempotent under concurrent webhook delivery.
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payments_transaction_id")
                        .table(Payments::Table)
                        .col(Payments::TransactionId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payments_order_id")
                        .table(Payments::Table)
                        .col(Payments::OrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Payments::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Payments {
        Table,
        Id,
        OrderId,
        TransactionId,
        Provider,
        Method,
        Amount,
        RawData,
        CreatedAt,
    }
}

mod m20240601_000004_create_transactions_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000004_create_transactions_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Transactions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Transactions::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Transactions::RestaurantId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Transactions::Kind).string().not_null())
                        .col(ColumnDef::new(Transactions::Amount).decimal().not_null())
                        .col(
                            ColumnDef::new(Transactions::BalanceBefore)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Transactions::BalanceAfter)
                                .decimal()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Transactions::OrderId).uuid().null())
                        .col(ColumnDef::new(Transactions::Note).string().null())
                        .col(
                            ColumnDef::new(Transactions::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_transactions_restaurant_id")
                        .table(Transactions::Table)
                        .col(Transactions::RestaurantId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Transactions::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Transactions {
        Table,
        Id,
        RestaurantId,
        Kind,
        Amount,
        BalanceBefore,
        BalanceAfter,
        OrderId,
        Note,
        CreatedAt,
    }
}

mod m20240601_000005_create_drones_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000005_create_drones_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Drones::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Drones::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Drones::Name).string().not_null())
                        .col(ColumnDef::new(Drones::Status).string().not_null())
                        .col(
                            ColumnDef::new(Drones::BatteryLevel)
                                .integer()
                                .not_null()
                                .default(100),
                        )
                        .col(ColumnDef::new(Drones::CurrentLat).double().not_null())
                        .col(ColumnDef::new(Drones::CurrentLng).double().not_null())
                        .col(ColumnDef::new(Drones::UpdatedAt).timestamp().not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_drones_status")
                        .table(Drones::Table)
                        .col(Drones::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Drones::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Drones {
        Table,
        Id,
        Name,
        Status,
        BatteryLevel,
        CurrentLat,
        CurrentLng,
        UpdatedAt,
    }
}

mod m20240601_000006_create_deliveries_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000006_create_deliveries_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Deliveries::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Deliveries::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Deliveries::OrderId).uuid().not_null())
                        .col(ColumnDef::new(Deliveries::DroneId).uuid().not_null())
                        .col(ColumnDef::new(Deliveries::Status).string().not_null())
                        .col(ColumnDef::new(Deliveries::PickupLat).double().not_null())
                        .col(ColumnDef::new(Deliveries::PickupLng).double().not_null())
                        .col(ColumnDef::new(Deliveries::DropoffLat).double().not_null())
                        .col(ColumnDef::new(Deliveries::DropoffLng).double().not_null())
                        .col(
                            ColumnDef::new(Deliveries::DispatchedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Deliveries::ArrivedAt).timestamp().null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_deliveries_order_id")
                        .table(Deliveries::Table)
                        .col(Deliveries::OrderId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_deliveries_drone_id")
                        .table(Deliveries::Table)
                        .col(Deliveries::DroneId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Deliveries::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Deliveries {
        Table,
        Id,
        OrderId,
        DroneId,
        Status,
        PickupLat,
        PickupLng,
        DropoffLat,
        DropoffLng,
        DispatchedAt,
        ArrivedAt,
    }
}

mod m20240601_000007_create_notifications_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000007_create_notifications_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Notifications::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Notifications::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Notifications::RecipientId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Notifications::RecipientRole)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Notifications::OrderId).uuid().not_null())
                        .col(ColumnDef::new(Notifications::Kind).string().not_null())
                        .col(ColumnDef::new(Notifications::Title).string().not_null())
                        .col(ColumnDef::new(Notifications::Message).string().not_null())
                        .col(
                            ColumnDef::new(Notifications::Read)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Notifications::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_notifications_recipient")
                        .table(Notifications::Table)
                        .col(Notifications::RecipientId)
                        .col(Notifications::RecipientRole)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Notifications::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Notifications {
        Table,
        Id,
        RecipientId,
        RecipientRole,
        OrderId,
        Kind,
        Title,
        Message,
        Read,
        CreatedAt,
    }
}
